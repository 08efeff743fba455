//! Incremental CSV decoding of a streamed response body into bounded batches.

use crate::error::Error;
use crate::normalize::CsvRow;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use log::debug;
use std::collections::VecDeque;

/// Decodes CSV text fed in arbitrary byte chunks.
///
/// Only complete lines are parsed; the bytes after the last line break of a chunk are carried
/// over to the next one. Each line is parsed on its own, so an unbalanced quote never spans
/// lines. The first non-empty line is taken as the header row.
#[derive(Default)]
pub struct CsvDecoder {
    carry: Vec<u8>,
    headers: Option<Vec<String>>,
}

impl CsvDecoder {
    pub fn feed(&mut self, chunk: &[u8], out: &mut VecDeque<CsvRow>) {
        let carried = self.carry.len();
        self.carry.extend_from_slice(chunk);

        let Some(last_break) = chunk.iter().rposition(|b| *b == b'\n') else {
            return;
        };
        let partial = self.carry.split_off(carried + last_break + 1);
        let complete = std::mem::replace(&mut self.carry, partial);
        for line in complete.split(|b| *b == b'\n') {
            self.parse_line(line, out);
        }
    }

    /// Parses the unterminated final line, if any.
    pub fn finish(&mut self, out: &mut VecDeque<CsvRow>) {
        let rest = std::mem::take(&mut self.carry);
        self.parse_line(&rest, out);
    }

    fn parse_line(&mut self, line: &[u8], out: &mut VecDeque<CsvRow>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_reader(line);

        let record = match reader.byte_records().next() {
            Some(Ok(record)) => record,
            Some(Err(err)) => {
                debug!("skipping unreadable CSV line: {}", err);
                return;
            }
            None => return,
        };

        let fields: Vec<String> = record
            .iter()
            .map(|field| String::from_utf8_lossy(field).trim().to_string())
            .collect();

        if fields.iter().all(|field| field.is_empty()) {
            return;
        }

        match &self.headers {
            None => self.headers = Some(fields),
            Some(headers) => out.push_back(headers.iter().cloned().zip(fields).collect::<CsvRow>()),
        }
    }
}

struct BatchState<T, F> {
    body: BoxStream<'static, Result<Bytes, Error>>,
    decoder: CsvDecoder,
    pending: VecDeque<CsvRow>,
    map: F,
    batch_size: usize,
    finished: bool,
    _record: std::marker::PhantomData<fn() -> T>,
}

impl<T, F> BatchState<T, F>
where
    F: FnMut(CsvRow) -> T,
{
    async fn next_batch(&mut self) -> Result<Option<Vec<T>>, Error> {
        loop {
            if self.pending.len() >= self.batch_size {
                let size = self.batch_size;
                return Ok(Some(self.take(size)));
            }

            if self.finished {
                let size = self.pending.len();
                return Ok((size > 0).then(|| self.take(size)));
            }

            match self.body.try_next().await? {
                Some(chunk) => self.decoder.feed(&chunk, &mut self.pending),
                None => {
                    self.decoder.finish(&mut self.pending);
                    self.finished = true;
                }
            }
        }
    }

    fn take(&mut self, size: usize) -> Vec<T> {
        let map = &mut self.map;
        self.pending.drain(..size).map(map).collect()
    }
}

/// Turns a byte stream into a lazy stream of record batches of at most `batch_size` rows.
///
/// The body is only polled when the consumer asks for the next batch and no full batch is
/// buffered, so at most one batch plus one network chunk is held in memory. A transport error
/// ends the stream with that error.
pub fn csv_batches<S, E, T, F>(
    body: S,
    batch_size: usize,
    map: F,
) -> BoxStream<'static, Result<Vec<T>, Error>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Error> + 'static,
    T: Send + 'static,
    F: FnMut(CsvRow) -> T + Send + 'static,
{
    let state = BatchState {
        body: body.map_err(Into::<Error>::into).boxed(),
        decoder: CsvDecoder::default(),
        pending: VecDeque::new(),
        map,
        batch_size: batch_size.max(1),
        finished: false,
        _record: std::marker::PhantomData,
    };

    stream::try_unfold(state, |mut state| async move {
        let batch = state.next_batch().await?;
        Ok::<_, Error>(batch.map(|batch| (batch, state)))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "Date,Ad Unit ID,Revenue,Country\r\n\
        2024-03-01 00:00:01,unit-1,0.01,us\r\n\
        \r\n\
        2024-03-01 00:00:02,\"unit,2\",0.02,de\r\n\
        \x20\x20\n\
        2024-03-01 00:00:03,unit-3,0.03,fr\r\n\
        2024-03-01 00:00:04,unit-4,0.04,jp";

    fn chunked(text: &str, size: usize) -> Vec<Result<Bytes, Error>> {
        text.as_bytes()
            .chunks(size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect()
    }

    async fn collect_batches(
        chunks: Vec<Result<Bytes, Error>>,
        batch_size: usize,
    ) -> Vec<Vec<CsvRow>> {
        csv_batches(stream::iter(chunks), batch_size, |row| row)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rows_are_independent_of_chunking() {
        let whole: Vec<CsvRow> = collect_batches(chunked(REPORT, REPORT.len()), 100)
            .await
            .concat();
        assert_eq!(whole.len(), 4);

        for size in [1, 2, 3, 7, 16, 31] {
            let rows = collect_batches(chunked(REPORT, size), 100).await.concat();
            assert_eq!(rows, whole, "chunk size {}", size);
        }
    }

    #[tokio::test]
    async fn test_batches_are_capped() {
        let batches = collect_batches(chunked(REPORT, 5), 3).await;
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 1]);
    }

    #[tokio::test]
    async fn test_quoted_field_keeps_comma() {
        let rows = collect_batches(chunked("Date,Revenue\n2024-01-01,\"1,5\"\n", 4), 10)
            .await
            .concat();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Date"], "2024-01-01");
        assert_eq!(rows[0]["Revenue"], "1,5");
    }

    #[tokio::test]
    async fn test_unclosed_quote_stays_on_its_line() {
        let text = "Date,Custom Data\n2024-03-01,\"oops\n2024-03-02,ok\n2024-03-03,ok\n";

        for size in [1, 2, 5, 13, text.len()] {
            let rows = collect_batches(chunked(text, size), 10).await.concat();
            assert_eq!(rows.len(), 3, "chunk size {}", size);
            assert_eq!(rows[0]["Date"], "2024-03-01");
            assert_eq!(rows[1]["Date"], "2024-03-02");
            assert_eq!(rows[1]["Custom Data"], "ok");
            assert_eq!(rows[2]["Date"], "2024-03-03");
        }
    }

    #[test]
    fn test_long_line_over_many_chunks() {
        let value = "x".repeat(10_000);
        let text = format!("Date,Custom Data\n2024-03-01,{}\n2024-03-02,ok", value);
        let mut decoder = CsvDecoder::default();
        let mut out = VecDeque::new();

        for chunk in text.as_bytes().chunks(3) {
            decoder.feed(chunk, &mut out);
        }
        assert_eq!(out.len(), 1);
        decoder.finish(&mut out);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["Custom Data"], value);
        assert_eq!(out[1]["Custom Data"], "ok");
    }

    #[tokio::test]
    async fn test_doubled_quote_is_unescaped() {
        let rows = collect_batches(chunked("A,B\n\"say \"\"hi\"\"\",2\n", 3), 10)
            .await
            .concat();
        assert_eq!(rows[0]["A"], "say \"hi\"");
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let text = "Country,Ad Unit Name\nde,Größe\n";
        let rows = collect_batches(chunked(text, 1), 10).await.concat();
        assert_eq!(rows[0]["Ad Unit Name"], "Größe");
    }

    #[tokio::test]
    async fn test_header_only_and_empty_input() {
        assert!(collect_batches(chunked("\n  \nDate,Revenue\n", 2), 10).await.is_empty());
        assert!(collect_batches(vec![], 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_aborts_stream() {
        let chunks = vec![
            Ok(Bytes::from_static(b"Date,Revenue\n2024-01-01,1\n")),
            Err(Error::UpstreamStatus {
                status: 502,
                body: String::new(),
            }),
        ];

        let result: Result<Vec<Vec<CsvRow>>, Error> =
            csv_batches(stream::iter(chunks), 10, |row| row).try_collect().await;

        assert!(matches!(
            result.unwrap_err(),
            Error::UpstreamStatus { status: 502, .. }
        ));
    }

    #[tokio::test]
    async fn test_rows_are_mapped() {
        let batches = collect_batches(chunked(REPORT, 8), 2).await;
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 4);

        let sizes: Vec<usize> = csv_batches(stream::iter(chunked(REPORT, 8)), 2, |row| {
            row.get("Ad Unit ID").map(String::len).unwrap_or(0)
        })
        .map_ok(|batch| batch.len())
        .try_collect()
        .await
        .unwrap();
        assert_eq!(sizes, vec![2, 2]);
    }
}
