//! Writing completed transfers to disk.

use std::io;
use std::path::{Path, PathBuf};

use lshr_core::Announce;
use tokio::io::AsyncWriteExt;

const FALLBACK_NAME: &str = "received";

/// Reduce an announced filename to a single safe path component.
/// Directories, `.`/`..` and control characters never reach the filesystem.
pub fn sanitize_filename(raw: &[u8]) -> String {
    let lossy = String::from_utf8_lossy(raw);
    let last = lossy.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write `data` under `dir`. An existing file is never replaced: the
/// transfer ID is appended instead (`name.<id>`).
pub async fn save(dir: &Path, announce: &Announce, data: &[u8]) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let name = sanitize_filename(&announce.filename);
    let primary = dir.join(&name);
    let fallback = dir.join(format!("{name}.{}", announce.transfer_id));
    for path in [primary, fallback] {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(data).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("{name} and its .{} variant both exist", announce.transfer_id),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lshr_core::{ContentHash, TransferId, PROTOCOL_VERSION};

    fn announce(name: &str, id: u64, data: &[u8]) -> Announce {
        Announce {
            version: PROTOCOL_VERSION,
            filename: name.as_bytes().to_vec(),
            content_hash: ContentHash::of(data),
            transfer_id: TransferId::from_u64(id),
            total_size: data.len() as u64,
            num_blocks: if data.is_empty() { 0 } else { 1 },
        }
    }

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lshr_output_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn strips_directories() {
        assert_eq!(sanitize_filename(b"../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(b"C:\\Users\\me\\report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename(b"plain.txt"), "plain.txt");
    }

    #[test]
    fn degenerate_names_fall_back() {
        assert_eq!(sanitize_filename(b""), FALLBACK_NAME);
        assert_eq!(sanitize_filename(b".."), FALLBACK_NAME);
        assert_eq!(sanitize_filename(b"dir/"), FALLBACK_NAME);
        assert_eq!(sanitize_filename(b"a\nb\x07"), "ab");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let name = sanitize_filename(&[0x66, 0xff, 0x6f]);
        assert!(name.starts_with('f') && name.ends_with('o'));
    }

    #[tokio::test]
    async fn never_overwrites() {
        let dir = scratch("overwrite");
        let first = save(&dir, &announce("a.bin", 1, b"one"), b"one").await.unwrap();
        assert_eq!(first, dir.join("a.bin"));
        let second = save(&dir, &announce("a.bin", 0xab, b"two"), b"two").await.unwrap();
        assert_eq!(second, dir.join("a.bin.00000000000000ab"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
        assert!(save(&dir, &announce("a.bin", 0xab, b"x"), b"x").await.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_file_is_written() {
        let dir = scratch("empty");
        let path = save(&dir, &announce("empty", 2, b""), b"").await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
