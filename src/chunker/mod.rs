use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// A window of file data starting at `offset`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub offset: u64,
    pub data: Vec<u8>,
    pub is_last: bool,
}

impl Chunk {
    /// Inclusive byte index of the last byte in this chunk.
    pub fn end(&self) -> u64 {
        (self.offset + self.data.len() as u64).saturating_sub(1)
    }
}

/// Read up to `chunk_size` bytes of `file` starting at `offset`.
///
/// `total_len` is the full file length; it decides whether the window is the
/// final one. Short reads are retried until the window is filled or EOF.
pub fn read_chunk_at(
    file: &mut File,
    offset: u64,
    chunk_size: usize,
    total_len: u64,
) -> io::Result<Chunk> {
    file.seek(SeekFrom::Start(offset))?;

    let remaining = total_len.saturating_sub(offset);
    let want = chunk_size.min(remaining as usize);
    let mut buf = vec![0u8; want];
    let mut filled = 0;

    while filled < want {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break, // EOF
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    buf.truncate(filled);
    let is_last = offset + filled as u64 >= total_len;

    Ok(Chunk {
        offset,
        data: buf,
        is_last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch(data: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.bin");
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        (dir, path)
    }

    #[test]
    fn test_read_chunks_cover_file() {
        let data: Vec<u8> = (0..5000).map(|i| (i % 256) as u8).collect();
        let (_dir, path) = scratch(&data);
        let mut f = File::open(&path).unwrap();

        let mut offset = 0u64;
        let mut reassembled = Vec::new();
        let mut count = 0;
        loop {
            let chunk = read_chunk_at(&mut f, offset, 2000, data.len() as u64).unwrap();
            reassembled.extend_from_slice(&chunk.data);
            offset = chunk.end() + 1;
            count += 1;
            if chunk.is_last {
                break;
            }
        }
        assert_eq!(count, 3);
        assert_eq!(reassembled, data);
    }

    #[test]
    fn test_exact_multiple_marks_last() {
        let data = vec![7u8; 2048];
        let (_dir, path) = scratch(&data);
        let mut f = File::open(&path).unwrap();

        let first = read_chunk_at(&mut f, 0, 1024, 2048).unwrap();
        assert!(!first.is_last);
        let second = read_chunk_at(&mut f, 1024, 1024, 2048).unwrap();
        assert!(second.is_last);
        assert_eq!(second.end(), 2047);
    }

    #[test]
    fn test_reread_same_offset() {
        let data: Vec<u8> = (0..100).collect();
        let (_dir, path) = scratch(&data);
        let mut f = File::open(&path).unwrap();

        let a = read_chunk_at(&mut f, 40, 30, 100).unwrap();
        let b = read_chunk_at(&mut f, 40, 30, 100).unwrap();
        assert_eq!(a.data, b.data);
        assert_eq!(a.data[0], 40);
    }
}
