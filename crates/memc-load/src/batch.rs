//! Batch files on disk

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Buffered line source over a gzip-compressed batch.
pub type BatchReader = BufReader<MultiGzDecoder<File>>;

/// Open a batch for reading.
///
/// Only the file open can fail here; a corrupt gzip stream is reported by the
/// first read that hits it.
pub fn open_batch(path: &Path) -> std::io::Result<BatchReader> {
    let file = File::open(path)?;
    Ok(BufReader::with_capacity(64 * 1024, MultiGzDecoder::new(file)))
}
