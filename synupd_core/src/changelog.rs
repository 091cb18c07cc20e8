/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::changelog
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Reduce a published change log to the block describing the
    newest release.

  Security / Safety Notes:
    Text-only transformation; no I/O performed in this module.

  Dependencies:
    None beyond std.

  Operational Scope:
    Used when presenting an available update to the operator.

  Revision History:
    2025-11-12 COD  Added changelog extraction.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Empty input is a valid, empty result
============================================================*/

const VERSION_MARKER: &str = "Version ";

/// Return the lines of the first release block, trimmed.
///
/// A leading `Version ...` header is skipped; the next header ends the block.
pub fn extract_changelog(raw: &str) -> String {
    let mut block = String::new();
    for line in raw.lines() {
        if line.starts_with(VERSION_MARKER) {
            if !block.is_empty() {
                break;
            }
            continue;
        }
        block.push_str(line);
        block.push('\n');
    }
    block.trim().to_string()
}
