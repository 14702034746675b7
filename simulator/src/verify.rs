use std::fs::File;
use std::io::Read;
use std::path::Path;

use ota_harness_core::prelude::{HarnessResult, IoResultExt};

const CHUNK_SIZE: usize = 64 * 1024;

/// Byte exact comparison of two files.
pub fn files_identical(a: &Path, b: &Path) -> HarnessResult<bool> {
    let open = |path: &Path| {
        File::open(path).io_context(|| format!("Failed to open '{}'", path.display()))
    };
    let mut file_a = open(a)?;
    let mut file_b = open(b)?;

    let len = |file: &File, path: &Path| {
        file.metadata()
            .map(|m| m.len())
            .io_context(|| format!("Failed to stat '{}'", path.display()))
    };
    if len(&file_a, a)? != len(&file_b, b)? {
        return Ok(false);
    }

    let mut chunk_a = vec![0u8; CHUNK_SIZE];
    let mut chunk_b = vec![0u8; CHUNK_SIZE];
    loop {
        let read_a = fill(&mut file_a, &mut chunk_a)
            .io_context(|| format!("Failed to read '{}'", a.display()))?;
        let read_b = fill(&mut file_b, &mut chunk_b)
            .io_context(|| format!("Failed to read '{}'", b.display()))?;
        if read_a != read_b || chunk_a[..read_a] != chunk_b[..read_b] {
            return Ok(false);
        }
        if read_a == 0 {
            return Ok(true);
        }
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
