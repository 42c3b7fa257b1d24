#![allow(clippy::needless_range_loop)]
//! Coverage and overlap tests for window chunking and merging.
//!
//! These tests verify that logical ranges cover the input exactly once,
//! that padding is sliced from the right place, and that terms seen twice
//! near a cut come out of the merge once.

use lexiq_pipeline::{
    merge_chunk_results, AnalyzedTerm, Chunker, Classification, TextChunk, WindowChunker,
};

// =============================================================================
// Coverage: logical ranges cover every byte exactly once
// =============================================================================

/// Count how often each byte is covered by a logical range.
fn coverage_counts(chunks: &[TextChunk], text: &str) -> Vec<usize> {
    let mut counts = vec![0; text.len()];
    for chunk in chunks {
        for i in chunk.span() {
            counts[i] += 1;
        }
    }
    counts
}

#[test]
fn every_byte_covered_once() {
    let texts = [
        "Hello, world!",
        "The quick brown fox jumps over the lazy dog.",
        &"A".repeat(1000),
        "Short",
        " Leading and trailing spaces ",
        "Multiple\n\nParagraphs\n\nHere",
        "One. Two! Three? Four.\nFive.",
    ];

    for text in &texts {
        let chunks = WindowChunker::new(17, 4).chunk(text);
        assert!(
            coverage_counts(&chunks, text).iter().all(|&c| c == 1),
            "coverage broken for {:?}",
            &text[..text.len().min(50)]
        );
    }
}

#[test]
fn padding_is_sliced_from_neighbours() {
    let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
    let chunks = WindowChunker::new(20, 6).chunk(text);

    for chunk in &chunks {
        let before = &text[chunk.start_position - chunk.overlap_start..chunk.start_position];
        let after = &text[chunk.end_position..chunk.end_position + chunk.overlap_end];
        assert!(chunk.content.starts_with(before));
        assert!(chunk.content.ends_with(after));
        assert_eq!(chunk.logical_text(), &text[chunk.span()]);
    }
    assert_eq!(chunks[0].overlap_start, 0);
    assert_eq!(chunks.last().unwrap().overlap_end, 0);
}

#[test]
fn long_document_without_terminators_is_cut_at_the_window_edge() {
    let text = "lorem ".repeat(2000);
    let chunks = WindowChunker::default().chunk(&text);

    let spans: Vec<_> = chunks.iter().map(TextChunk::span).collect();
    assert_eq!(spans, [0..4000, 4000..8000, 8000..12000]);
    assert_eq!(chunks[1].overlap_start, 150);
    assert_eq!(chunks[1].overlap_end, 150);
    assert_eq!(chunks[1].content.len(), 4300);
}

#[test]
fn cjk_sentences_are_kept_whole() {
    let text = "これは文です。".repeat(10);
    let chunks = WindowChunker::new(50, 6).chunk(&text);

    assert_eq!(chunks.len(), 5);
    for chunk in &chunks {
        assert!(chunk.logical_text().ends_with('。'));
        assert_eq!(chunk.len(), 42);
    }
}

// =============================================================================
// Merge: terms near a cut come out once, in document coordinates
// =============================================================================

fn term_at(text: &str, local: usize, len: usize) -> AnalyzedTerm {
    AnalyzedTerm::new(&text[..len], local, local + len, Classification::Review)
}

#[test]
fn term_in_leading_padding_is_reported_once() {
    let text = "lorem ".repeat(2000);
    let chunks = WindowChunker::default().chunk(&text);
    let surface = &text[3950..3965];

    // Chunk 0 sees it in its logical range, chunk 1 only inside its padding.
    let results = vec![
        vec![term_at(surface, 3950, 15)],
        vec![term_at(surface, 100, 15)],
        vec![],
    ];
    let merged = merge_chunk_results(results, &chunks);

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].span(), 3950..3965);
}

#[test]
fn term_in_trailing_padding_collapses_with_next_chunk() {
    let text = "lorem ".repeat(2000);
    let chunks = WindowChunker::default().chunk(&text);
    let surface = &text[4010..4020];

    // Chunk 0 sees it in its trailing padding, chunk 1 in its logical range.
    let results = vec![
        vec![term_at(surface, 4010, 10)],
        vec![term_at(surface, 160, 10)],
        vec![],
    ];
    let merged = merge_chunk_results(results, &chunks);

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].span(), 4010..4020);
    assert_eq!(&text[merged[0].span()], merged[0].text);
}

#[test]
fn terms_from_every_chunk_land_in_order() {
    let text = "lorem ".repeat(2000);
    let chunks = WindowChunker::default().chunk(&text);

    let results = vec![
        vec![term_at("lorem", 6, 5)],
        vec![term_at("lorem", 150 + 2, 5)],
        vec![term_at("lorem", 150 + 4, 5)],
    ];
    let merged = merge_chunk_results(results, &chunks);

    let starts: Vec<_> = merged.iter().map(|t| t.start_position).collect();
    assert_eq!(starts, [6, 4002, 8004]);
    for term in &merged {
        assert_eq!(&text[term.span()], "lorem");
    }
}
