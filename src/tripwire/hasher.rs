//! ST-014: BLAKE3 hashing for templates, resources, and image build contexts.
//!
//! Every digest is rendered as `"blake3:{hex}"`.

use std::io::Read;
use std::path::{Path, PathBuf};

const STREAM_BUF_SIZE: usize = 65536;
const PREFIX: &str = "blake3:";

fn render(hash: blake3::Hash) -> String {
    format!("{}{}", PREFIX, hash.to_hex())
}

/// Hash a string.
pub fn hash_string(s: &str) -> String {
    render(blake3::hash(s.as_bytes()))
}

/// Hash the compact JSON form of a value.
///
/// `serde_json` emits object keys sorted, so equal values hash equally.
pub fn hash_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    let json = serde_json::to_string(value).map_err(|e| format!("JSON serialize error: {}", e))?;
    Ok(hash_string(&json))
}

/// Hash a file's contents, streaming.
pub fn hash_file(path: &Path) -> Result<String, String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(render(hasher.finalize()))
}

/// Hash an image build context.
///
/// Walks the tree in sorted order, feeding each relative path and file hash.
/// Symlinks and dot-directories (`.git`, ...) are skipped.
pub fn hash_directory(root: &Path) -> Result<String, String> {
    if !root.is_dir() {
        return Err(format!("{} is not a directory", root.display()));
    }

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let read_dir = std::fs::read_dir(&dir)
            .map_err(|e| format!("cannot read dir {}: {}", dir.display(), e))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| format!("cannot read dir {}: {}", dir.display(), e))?;
            let ft = entry
                .file_type()
                .map_err(|e| format!("stat error: {}", e))?;
            let path = entry.path();
            if ft.is_symlink() {
                continue;
            }
            if ft.is_dir() {
                if !entry.file_name().to_string_lossy().starts_with('.') {
                    pending.push(path);
                }
                continue;
            }
            let rel = path
                .strip_prefix(root)
                .map_err(|e| format!("path prefix error: {}", e))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.push((rel, path));
        }
    }
    files.sort();

    let mut hasher = blake3::Hasher::new();
    for (rel, path) in &files {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash_file(path)?.as_bytes());
        hasher.update(b"\n");
    }
    Ok(render(hasher.finalize()))
}

/// Compute a composite hash from multiple component hashes. Order matters.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    render(hasher.finalize())
}

/// Hex digest without the `blake3:` prefix.
pub fn hex_digest(hash: &str) -> &str {
    hash.strip_prefix(PREFIX).unwrap_or(hash)
}
