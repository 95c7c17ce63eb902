use crate::domain::{PayloadEncoding, Point};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use thiserror::Error;

/// Gateway limit on a single request body, in uncompressed bytes.
pub const MAX_BODY_BYTES: usize = 10_000_000;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("Point {index} is empty")]
    EmptyPoint { index: usize },
    #[error("Maximum body size must be greater than 0")]
    ZeroLimit,
    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

/// One HTTP payload: framed points, optionally gzip-compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub buf: Bytes,
    pub npts: usize,
    pub encoding: PayloadEncoding,
    pub gzon: bool,
    /// Framed size before compression.
    pub raw_len: usize,
}

/// Splits an ordered point sequence into bodies whose framed size stays
/// within `max_body_bytes`.
///
/// Points keep their order and every point lands in exactly one body. A point
/// that is larger than the limit on its own still gets a body of its own;
/// rejecting it is the gateway's call, not ours.
pub struct BodySegmenter<'a> {
    points: &'a [Point],
    next: usize,
    encoding: PayloadEncoding,
    max_body_bytes: usize,
    gzip: bool,
    failed: bool,
}

impl<'a> BodySegmenter<'a> {
    pub fn new(
        points: &'a [Point],
        encoding: PayloadEncoding,
        max_body_bytes: usize,
        gzip: bool,
    ) -> Self {
        Self {
            points,
            next: 0,
            encoding,
            max_body_bytes,
            gzip,
            failed: false,
        }
    }

    fn build_next(&mut self) -> Result<Body, SegmentError> {
        if self.max_body_bytes == 0 {
            return Err(SegmentError::ZeroLimit);
        }

        let encoding = self.encoding;
        let start = self.next;
        let mut size = encoding.envelope_len();
        let mut end = start;

        while end < self.points.len() {
            let point = &self.points[end];
            if point.is_empty() {
                return Err(SegmentError::EmptyPoint { index: end });
            }
            let added = encoding.framed_len(point, end == start);
            if end > start && size + added > self.max_body_bytes {
                break;
            }
            size += added;
            end += 1;
        }

        let mut raw = Vec::with_capacity(size);
        encoding.open(&mut raw);
        for (i, point) in self.points[start..end].iter().enumerate() {
            encoding.push(&mut raw, point, i == 0);
        }
        encoding.close(&mut raw);
        self.next = end;

        let raw_len = raw.len();
        let buf = if self.gzip { gzip(&raw)? } else { raw };

        Ok(Body {
            buf: Bytes::from(buf),
            npts: end - start,
            encoding,
            gzon: self.gzip,
            raw_len,
        })
    }
}

impl Iterator for BodySegmenter<'_> {
    type Item = Result<Body, SegmentError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.points.len() {
            return None;
        }
        let body = self.build_next();
        self.failed = body.is_err();
        Some(body)
    }
}

/// Segment eagerly, failing before anything is sent if any body cannot be
/// built.
pub fn build_bodies(
    points: &[Point],
    encoding: PayloadEncoding,
    max_body_bytes: usize,
    gzip: bool,
) -> Result<Vec<Body>, SegmentError> {
    BodySegmenter::new(points, encoding, max_body_bytes, gzip).collect()
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}
