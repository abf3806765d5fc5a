use std::io::{self, Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use futures::{StreamExt, stream};

use crate::api::SliceBody;

/// Gzip a slice body chunk by chunk.
///
/// Only the compressed output of the current chunk is held in memory; the
/// gzip trailer is emitted once the input ends.
pub fn gzip_stream(input: SliceBody) -> SliceBody {
    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    stream::unfold(Some((input, encoder)), |state| async move {
        let (mut input, mut encoder) = state?;
        loop {
            match input.next().await {
                Some(Ok(chunk)) => {
                    if let Err(e) = encoder.write_all(&chunk) {
                        return Some((Err(e), None));
                    }
                    let out = std::mem::take(encoder.get_mut());
                    if !out.is_empty() {
                        return Some((Ok(Bytes::from(out)), Some((input, encoder))));
                    }
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => return Some((encoder.finish().map(Bytes::from), None)),
            }
        }
    })
    .boxed()
}

/// Decode a complete gzip body.
pub fn gunzip(compressed: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(compressed).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    fn chunks(parts: Vec<&'static [u8]>) -> SliceBody {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p)))).boxed()
    }

    #[tokio::test]
    async fn gzip_stream_decodes_to_concatenated_input() {
        let line: &'static [u8] = b"a,b,c\n1,2,3\n";
        let body = chunks(vec![line; 500]);

        let compressed: Vec<Bytes> = gzip_stream(body).try_collect().await.unwrap();
        let compressed = compressed.concat();
        assert!(compressed.len() < line.len() * 500);
        assert_eq!(gunzip(&compressed).unwrap(), line.repeat(500));
    }

    #[tokio::test]
    async fn empty_input_is_a_valid_gzip() {
        let compressed: Vec<Bytes> = gzip_stream(chunks(vec![])).try_collect().await.unwrap();
        assert!(!compressed.is_empty());
        assert!(gunzip(&compressed.concat()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_error_ends_the_stream() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"1,a\n")),
            Err(io::Error::other("disk gone")),
            Ok(Bytes::from_static(b"2,b\n")),
        ])
        .boxed();

        let err = gzip_stream(body)
            .try_collect::<Vec<Bytes>>()
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "disk gone");
    }
}
