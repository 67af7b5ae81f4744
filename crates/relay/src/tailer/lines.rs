//! 라인 분할기
//!
//! 임의 크기로 잘려 들어오는 바이트 청크를 `\n` 기준의 완전한 라인으로 조립합니다.
//! 마지막 미완성 라인은 내부에 보관했다가 다음 청크와 이어 붙이며,
//! 어떤 청크 경계에서도 같은 라인 시퀀스를 만들어 냅니다.

use bytes::Bytes;

/// 잘린 라인 로그에 남길 앞부분 바이트 수
const OVERSIZED_PREFIX_BYTES: usize = 256;

/// 분할 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Split {
    /// 완전한 라인 (개행 및 끝의 `\r` 제외)
    Line {
        /// 라인 바이트
        bytes: Bytes,
        /// 라인 시작 오프셋
        start: u64,
        /// 개행 다음 오프셋
        end: u64,
    },
    /// 최대 길이를 넘어 버려진 라인
    Oversized {
        /// 라인 시작 오프셋
        start: u64,
        /// 개행 다음 오프셋
        end: u64,
        /// 개행을 제외한 전체 길이
        len: usize,
        /// 로그용 앞부분
        prefix: Bytes,
    },
}

impl Split {
    /// 개행 다음 오프셋
    pub fn end(&self) -> u64 {
        match self {
            Self::Line { end, .. } | Self::Oversized { end, .. } => *end,
        }
    }
}

/// 라인 분할기
#[derive(Debug)]
pub struct LineSplitter {
    max_line_length: usize,
    /// 다음에 들어올 바이트의 파일 오프셋
    next_offset: u64,
    /// 현재 미완성 라인의 시작 오프셋
    line_start: u64,
    partial: Vec<u8>,
    /// 최대 길이를 넘긴 경우 지금까지 관측된 라인 길이
    overflow_len: Option<usize>,
}

impl LineSplitter {
    /// `offset`부터 읽기 시작하는 분할기를 생성합니다.
    pub fn new(max_line_length: usize, offset: u64) -> Self {
        Self {
            max_line_length,
            next_offset: offset,
            line_start: offset,
            partial: Vec::new(),
            overflow_len: None,
        }
    }

    /// 청크를 밀어 넣고 완성된 라인을 `out`에 추가합니다.
    ///
    /// 청크는 직전 청크에 바로 이어지는 바이트여야 합니다.
    pub fn push(&mut self, chunk: &[u8], out: &mut Vec<Split>) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.absorb(&rest[..pos]);
            self.next_offset += (pos + 1) as u64;
            self.finish_line(out);
            rest = &rest[pos + 1..];
        }
        self.absorb(rest);
        self.next_offset += rest.len() as u64;
    }

    fn absorb(&mut self, piece: &[u8]) {
        if let Some(len) = self.overflow_len.as_mut() {
            *len += piece.len();
            return;
        }
        let total = self.partial.len() + piece.len();
        if total > self.max_line_length {
            let keep = OVERSIZED_PREFIX_BYTES.saturating_sub(self.partial.len());
            self.partial.extend_from_slice(&piece[..keep.min(piece.len())]);
            self.partial.truncate(OVERSIZED_PREFIX_BYTES);
            self.overflow_len = Some(total);
        } else {
            self.partial.extend_from_slice(piece);
        }
    }

    fn finish_line(&mut self, out: &mut Vec<Split>) {
        let start = self.line_start;
        let end = self.next_offset;
        self.line_start = end;
        let mut line = std::mem::take(&mut self.partial);

        if let Some(len) = self.overflow_len.take() {
            out.push(Split::Oversized {
                start,
                end,
                len,
                prefix: Bytes::from(line),
            });
            return;
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.trim_ascii().is_empty() {
            return;
        }
        out.push(Split::Line {
            bytes: Bytes::from(line),
            start,
            end,
        });
    }

    /// 보관 중인 미완성 라인의 바이트 수
    pub fn pending_len(&self) -> usize {
        self.overflow_len.unwrap_or(self.partial.len())
    }

    /// 다음에 들어올 바이트의 오프셋 (= 파일 읽기 위치)
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// 미완성 라인을 버리고 `offset`에서 다시 시작합니다.
    ///
    /// 버려진 바이트 수를 반환합니다.
    pub fn reset(&mut self, offset: u64) -> usize {
        let discarded = self.pending_len();
        self.partial.clear();
        self.overflow_len = None;
        self.next_offset = offset;
        self.line_start = offset;
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn split_all(max: usize, chunks: &[&[u8]]) -> Vec<Split> {
        let mut splitter = LineSplitter::new(max, 0);
        let mut out = Vec::new();
        for chunk in chunks {
            splitter.push(chunk, &mut out);
        }
        out
    }

    fn line_texts(splits: &[Split]) -> Vec<String> {
        splits
            .iter()
            .filter_map(|s| match s {
                Split::Line { bytes, .. } => Some(String::from_utf8_lossy(bytes).into_owned()),
                Split::Oversized { .. } => None,
            })
            .collect()
    }

    #[test]
    fn splits_complete_lines_with_offsets() {
        let out = split_all(1024, &[b"{\"a\":1}\n{\"b\":2}\n"]);
        assert_eq!(
            out,
            vec![
                Split::Line {
                    bytes: Bytes::from_static(b"{\"a\":1}"),
                    start: 0,
                    end: 8
                },
                Split::Line {
                    bytes: Bytes::from_static(b"{\"b\":2}"),
                    start: 8,
                    end: 16
                },
            ]
        );
    }

    #[test]
    fn partial_line_is_held_until_newline() {
        let mut splitter = LineSplitter::new(1024, 0);
        let mut out = Vec::new();
        splitter.push(b"{\"event_type\":", &mut out);
        assert!(out.is_empty());
        assert_eq!(splitter.pending_len(), 14);

        splitter.push(b"\"dns\"}\n", &mut out);
        assert_eq!(line_texts(&out), vec!["{\"event_type\":\"dns\"}"]);
        assert_eq!(out[0].end(), 21);
        assert_eq!(splitter.pending_len(), 0);
    }

    #[test]
    fn strips_trailing_carriage_return() {
        let out = split_all(1024, &[b"{\"a\":1}\r\n"]);
        assert_eq!(line_texts(&out), vec!["{\"a\":1}"]);
        assert_eq!(out[0].end(), 9);
    }

    #[test]
    fn skips_blank_lines() {
        let out = split_all(1024, &[b"\n\r\n  \n{\"a\":1}\n\n"]);
        assert_eq!(line_texts(&out), vec!["{\"a\":1}"]);
        match &out[0] {
            Split::Line { start, .. } => assert_eq!(*start, 6),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn oversized_line_is_discarded_up_to_newline() {
        let long = vec![b'x'; 40];
        let out = split_all(16, &[&long[..20], &long[20..], b"\n{\"ok\":1}\n"]);
        assert_eq!(out.len(), 2);
        match &out[0] {
            Split::Oversized {
                start, end, len, ..
            } => {
                assert_eq!(*start, 0);
                assert_eq!(*end, 41);
                assert_eq!(*len, 40);
            }
            other => panic!("expected oversized, got {other:?}"),
        }
        assert_eq!(line_texts(&out), vec!["{\"ok\":1}"]);
    }

    #[test]
    fn reset_discards_partial() {
        let mut splitter = LineSplitter::new(1024, 100);
        let mut out = Vec::new();
        splitter.push(b"{\"half\":", &mut out);
        assert_eq!(splitter.next_offset(), 108);
        assert_eq!(splitter.reset(0), 8);
        assert_eq!(splitter.next_offset(), 0);

        splitter.push(b"{\"new\":1}\n", &mut out);
        assert_eq!(line_texts(&out), vec!["{\"new\":1}"]);
        match &out[0] {
            Split::Line { start, .. } => assert_eq!(*start, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_lines(
            lines in proptest::collection::vec("[a-z0-9{}:\" ]{0,40}", 0..20),
            cuts in proptest::collection::vec(0usize..2000, 0..10),
        ) {
            let mut data = Vec::new();
            for line in &lines {
                data.extend_from_slice(line.as_bytes());
                data.push(b'\n');
            }

            let whole = split_all(64, &[&data]);

            let mut points: Vec<usize> = cuts.into_iter().map(|c| c % (data.len() + 1)).collect();
            points.sort_unstable();
            let mut chunks: Vec<&[u8]> = Vec::new();
            let mut prev = 0;
            for p in points {
                chunks.push(&data[prev..p]);
                prev = p;
            }
            chunks.push(&data[prev..]);
            let pieced = split_all(64, &chunks);

            prop_assert_eq!(whole, pieced);
        }

        #[test]
        fn offsets_are_contiguous_and_monotonic(
            lines in proptest::collection::vec("[a-z]{1,30}", 1..20),
        ) {
            let mut data = Vec::new();
            for line in &lines {
                data.extend_from_slice(line.as_bytes());
                data.push(b'\n');
            }
            let out = split_all(1024, &[&data]);
            prop_assert_eq!(out.len(), lines.len());
            let mut expected_start = 0u64;
            for split in &out {
                if let Split::Line { start, end, bytes } = split {
                    prop_assert_eq!(*start, expected_start);
                    prop_assert_eq!(*end, start + bytes.len() as u64 + 1);
                    expected_start = *end;
                }
            }
            prop_assert_eq!(expected_start, data.len() as u64);
        }
    }
}
