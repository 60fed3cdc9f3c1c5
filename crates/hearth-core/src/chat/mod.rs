//! Response squashing: merging token-level chunks into minimal ordered
//! display blocks, and deriving a displayed transcript from a session's
//! committed history.

use crate::engine::{HistoryEntry, ResponseChunk};
use crate::state::{Block, ChatItem};

/// Fold one incoming block into an existing block list, merging it into the
/// last element where possible. The input slice is never mutated.
///
/// Merge rules, in order:
/// 1. A different kind than the last element appends, except an
///    empty-string text block, which is dropped instead of polluting the
///    list with zero-length fragments.
/// 2. Text onto text concatenates.
/// 3. A segment onto an open segment (no `end_time` yet) of the same kind
///    concatenates and adopts the incoming `end_time`.
/// 4. Anything else appends.
pub fn squash(existing: &[Block], incoming: Block) -> Vec<Block> {
    let mut blocks = existing.to_vec();

    let merged = match (blocks.last_mut(), &incoming) {
        (Some(Block::Text { text: last }), Block::Text { text }) => {
            last.push_str(text);
            true
        }
        (
            Some(Block::Segment {
                segment_type: last_kind,
                text: last_text,
                end_time: last_end,
                ..
            }),
            Block::Segment {
                segment_type,
                text,
                end_time,
                ..
            },
        ) if last_kind == segment_type && last_end.is_none() => {
            last_text.push_str(text);
            *last_end = *end_time;
            true
        }
        _ => false,
    };

    if !merged {
        let empty_text = matches!(&incoming, Block::Text { text } if text.is_empty());
        if !empty_text {
            blocks.push(incoming);
        }
    }

    blocks
}

/// Squash a full response chunk sequence into its minimal block list.
pub fn squash_response(response: &[ResponseChunk]) -> Vec<Block> {
    response
        .iter()
        .fold(Vec::new(), |blocks, chunk| squash(&blocks, chunk.into()))
}

/// Derive the displayed transcript from committed session history. System
/// entries carry no display representation and are skipped.
pub fn simplified_history(entries: &[HistoryEntry]) -> Vec<ChatItem> {
    entries
        .iter()
        .filter_map(|entry| match entry {
            HistoryEntry::System { .. } => None,
            HistoryEntry::User { text } => Some(ChatItem::User {
                message: text.clone(),
            }),
            HistoryEntry::Model { response } => Some(ChatItem::Model {
                blocks: squash_response(response),
            }),
        })
        .collect()
}

impl From<&ResponseChunk> for Block {
    fn from(chunk: &ResponseChunk) -> Self {
        match chunk {
            ResponseChunk::Text { text } => Block::Text { text: text.clone() },
            ResponseChunk::Segment {
                segment_type,
                text,
                start_time,
                end_time,
            } => Block::Segment {
                segment_type: *segment_type,
                text: text.clone(),
                start_time: *start_time,
                end_time: *end_time,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::state::SegmentKind;

    fn text(s: &str) -> Block {
        Block::Text {
            text: s.to_string(),
        }
    }

    fn thought(s: &str) -> Block {
        Block::Segment {
            segment_type: SegmentKind::Thought,
            text: s.to_string(),
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn test_adjacent_text_blocks_concatenate() {
        let blocks = squash(&[text("Hel")], text("lo"));
        assert_eq!(blocks, vec![text("Hello")]);
    }

    #[test]
    fn test_empty_text_append_is_suppressed() {
        assert!(squash(&[], text("")).is_empty());

        let after_segment = squash(&[thought("hmm")], text(""));
        assert_eq!(after_segment, vec![thought("hmm")]);
    }

    #[test]
    fn test_empty_text_extends_open_text_block_harmlessly() {
        let blocks = squash(&[text("abc")], text(""));
        assert_eq!(blocks, vec![text("abc")]);
    }

    #[test]
    fn test_open_segments_of_same_kind_merge_and_adopt_end_time() {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let incoming = Block::Segment {
            segment_type: SegmentKind::Thought,
            text: " more".to_string(),
            start_time: None,
            end_time: Some(end),
        };

        let blocks = squash(&[thought("some")], incoming);

        assert_eq!(
            blocks,
            vec![Block::Segment {
                segment_type: SegmentKind::Thought,
                text: "some more".to_string(),
                start_time: None,
                end_time: Some(end),
            }]
        );
    }

    #[test]
    fn test_closed_segment_is_not_extended() {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let closed = Block::Segment {
            segment_type: SegmentKind::Thought,
            text: "done".to_string(),
            start_time: None,
            end_time: Some(end),
        };

        let blocks = squash(&[closed.clone()], thought("next"));
        assert_eq!(blocks, vec![closed, thought("next")]);
    }

    #[test]
    fn test_different_segment_kinds_do_not_merge() {
        let comment = Block::Segment {
            segment_type: SegmentKind::Comment,
            text: "aside".to_string(),
            start_time: None,
            end_time: None,
        };
        let blocks = squash(&[thought("hmm")], comment.clone());
        assert_eq!(blocks, vec![thought("hmm"), comment]);
    }

    #[test]
    fn test_input_slice_is_never_mutated() {
        let original = vec![text("a")];
        let _ = squash(&original, text("b"));
        assert_eq!(original, vec![text("a")]);
    }

    #[test]
    fn test_no_adjacent_same_kind_blocks_for_any_chunk_sequence() {
        let sequences: Vec<Vec<ResponseChunk>> = vec![
            vec![
                ResponseChunk::Text { text: "a".into() },
                ResponseChunk::Text { text: "b".into() },
                ResponseChunk::Segment {
                    segment_type: SegmentKind::Thought,
                    text: "t1".into(),
                    start_time: None,
                    end_time: None,
                },
                ResponseChunk::Segment {
                    segment_type: SegmentKind::Thought,
                    text: "t2".into(),
                    start_time: None,
                    end_time: None,
                },
                ResponseChunk::Text { text: "".into() },
                ResponseChunk::Text { text: "c".into() },
            ],
            vec![
                ResponseChunk::Text { text: "".into() },
                ResponseChunk::Segment {
                    segment_type: SegmentKind::Comment,
                    text: "x".into(),
                    start_time: None,
                    end_time: None,
                },
                ResponseChunk::Text { text: "y".into() },
                ResponseChunk::Text { text: "z".into() },
            ],
        ];

        for chunks in sequences {
            let blocks = squash_response(&chunks);
            for pair in blocks.windows(2) {
                match (&pair[0], &pair[1]) {
                    (Block::Text { .. }, Block::Text { .. }) => {
                        panic!("adjacent text blocks survived squashing")
                    }
                    (
                        Block::Segment {
                            segment_type: a,
                            end_time: None,
                            ..
                        },
                        Block::Segment {
                            segment_type: b, ..
                        },
                    ) if a == b => panic!("adjacent open segments survived squashing"),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn test_simplified_history_skips_system_entries() {
        let entries = vec![
            HistoryEntry::System {
                text: "be helpful".into(),
            },
            HistoryEntry::User { text: "hi".into() },
            HistoryEntry::Model {
                response: vec![
                    ResponseChunk::Text { text: "Hel".into() },
                    ResponseChunk::Text { text: "lo".into() },
                ],
            },
        ];

        let transcript = simplified_history(&entries);

        assert_eq!(
            transcript,
            vec![
                ChatItem::User {
                    message: "hi".into()
                },
                ChatItem::Model {
                    blocks: vec![text("Hello")]
                },
            ]
        );
    }
}
