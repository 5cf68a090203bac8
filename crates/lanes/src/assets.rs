//! Generated-asset persistence under `uploads/{sid}/`.

use std::path::Path;

use mf_domain::error::Result;

/// Write asset bytes and return `(filename, public_url)`.
///
/// Filenames are `<safe_session>_<epoch_ms>.<ext>`, served back via
/// the assets route.
pub fn save_asset(uploads_dir: &Path, session_id: &str, ext: &str, data: &[u8]) -> Result<(String, String)> {
    let dir = uploads_dir.join(session_id);
    std::fs::create_dir_all(&dir)?;

    let safe_session: String = session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string();
    let safe_session = if safe_session.is_empty() { "session".to_string() } else { safe_session };

    let ts_ms = chrono::Utc::now().timestamp_millis();
    let name = format!("{safe_session}_{ts_ms}.{}", ext.trim_start_matches('.'));
    std::fs::write(dir.join(&name), data)?;

    let url = format!("/api/assets/{session_id}/{name}");
    Ok((name, url))
}

/// Sanitize an uploaded filename for disk storage.
pub fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload.bin".into()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_under_session_dir_with_epoch_name() {
        let dir = tempfile::tempdir().unwrap();
        let (name, url) = save_asset(dir.path(), "sess-1", "png", b"bytes").unwrap();
        assert!(name.starts_with("sess-1_"));
        assert!(name.ends_with(".png"));
        assert_eq!(url, format!("/api/assets/sess-1/{name}"));
        assert!(dir.path().join("sess-1").join(&name).exists());
    }

    #[test]
    fn weird_session_ids_are_sanitized_in_filename() {
        let dir = tempfile::tempdir().unwrap();
        let (name, _) = save_asset(dir.path(), "../evil id", "txt", b"x").unwrap();
        assert!(!name.contains('/'));
        assert!(!name.contains(' '));
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(safe_filename("report v2 (final).pdf"), "report_v2__final_.pdf");
        assert_eq!(safe_filename(""), "upload.bin");
    }
}
