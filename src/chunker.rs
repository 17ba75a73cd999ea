//! Source chunking with span provenance.
//!
//! Transforms a file or markdown/HTML document into an ordered sequence of
//! chunks suitable for embedding. Code prefers AST boundaries (function,
//! class, impl) via tree-sitter for the natively parsed languages and falls
//! back to line windows on parse failure; markdown prefers heading-bounded
//! windows and treats fenced code blocks as atomic.
//!
//! Size discipline: no chunk exceeds `2 × max_chars` (a fenced block larger
//! than that is hard-split), adjacent fallback windows overlap by at most
//! `overlap_chars`, and the sequence is deterministic for identical input and
//! configuration.

use serde::Serialize;

/// How a source is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkerMode {
    /// AST boundaries for code, heading windows for markdown.
    Ast,
    /// Plain line windows with overlap.
    Character,
    /// Heading/paragraph windows for prose; same as `Ast` for code.
    Semantic,
}

impl ChunkerMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "character" => ChunkerMode::Character,
            "semantic" => ChunkerMode::Semantic,
            _ => ChunkerMode::Ast,
        }
    }
}

/// One chunk of a source, with its span.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkPiece {
    pub content: String,
    pub chunk_index: usize,
    /// 1-based inclusive line span within the source.
    pub start_line: u32,
    pub end_line: u32,
    pub is_code: bool,
    pub language: Option<String>,
}

/// Chunking knobs, resolved from [`crate::config::ChunkingConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub mode: ChunkerMode,
}

impl From<&crate::config::ChunkingConfig> for ChunkParams {
    fn from(c: &crate::config::ChunkingConfig) -> Self {
        Self {
            max_chars: c.max_chars,
            overlap_chars: c.overlap_chars,
            mode: ChunkerMode::parse(&c.mode),
        }
    }
}

/// Map a file extension to the language tag used in payloads and routing.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "rs" => Some("rust"),
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" | "mjs" => Some("javascript"),
        "py" => Some("python"),
        "go" => Some("go"),
        "java" => Some("java"),
        "c" | "h" => Some("c"),
        "cpp" | "cc" | "hpp" => Some("cpp"),
        "rb" => Some("ruby"),
        "php" => Some("php"),
        "cs" => Some("csharp"),
        "swift" => Some("swift"),
        "kt" => Some("kotlin"),
        "sh" | "bash" => Some("shell"),
        "sql" => Some("sql"),
        "toml" => Some("toml"),
        "yaml" | "yml" => Some("yaml"),
        "json" => Some("json"),
        "md" | "markdown" => Some("markdown"),
        "html" | "htm" => Some("html"),
        "txt" => Some("text"),
        _ => None,
    }
}

fn is_prose(language: Option<&str>) -> bool {
    matches!(language, Some("markdown") | Some("html") | Some("text") | None)
}

/// Chunk a source text. `language` is the hint derived from the path; `None`
/// is treated as prose.
pub fn chunk_source(text: &str, language: Option<&str>, params: &ChunkParams) -> Vec<ChunkPiece> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let pieces = match (params.mode, is_prose(language)) {
        (ChunkerMode::Character, _) => line_windows(text, params, 0),
        (_, true) => heading_windows(text, params),
        (_, false) => ast_or_line_windows(text, language, params),
    };

    finalize(pieces, language)
}

/// Assign contiguous indices and the language tag.
fn finalize(pieces: Vec<RawPiece>, language: Option<&str>) -> Vec<ChunkPiece> {
    let is_code = !is_prose(language);
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, p)| ChunkPiece {
            content: p.content,
            chunk_index: i,
            start_line: p.start_line,
            end_line: p.end_line,
            is_code,
            language: language.map(|l| l.to_string()),
        })
        .collect()
}

struct RawPiece {
    content: String,
    start_line: u32,
    end_line: u32,
}

// ============ AST chunking ============

fn ts_language(language: Option<&str>) -> Option<tree_sitter::Language> {
    match language {
        Some("rust") => Some(tree_sitter_rust::language()),
        Some("typescript") => Some(tree_sitter_typescript::language_typescript()),
        Some("python") => Some(tree_sitter_python::language()),
        _ => None,
    }
}

/// Prefer AST boundaries; fall back to line windows when there is no grammar
/// or the parse fails.
fn ast_or_line_windows(text: &str, language: Option<&str>, params: &ChunkParams) -> Vec<RawPiece> {
    let Some(grammar) = ts_language(language) else {
        return line_windows(text, params, 0);
    };

    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&grammar).is_err() {
        return line_windows(text, params, 0);
    }
    let Some(tree) = parser.parse(text, None) else {
        return line_windows(text, params, 0);
    };

    let lines: Vec<&str> = text.lines().collect();
    let root = tree.root_node();

    // Top-level items as (start_row, end_row) segments, in source order.
    let mut segments: Vec<(usize, usize)> = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let start = child.start_position().row;
        let end = child.end_position().row.min(lines.len().saturating_sub(1));
        match segments.last_mut() {
            // Comments and attributes directly above an item parse as
            // siblings; merge touching/overlapping segments.
            Some((_, prev_end)) if start <= *prev_end + 1 => {
                *prev_end = (*prev_end).max(end);
            }
            _ => segments.push((start, end)),
        }
    }

    if segments.is_empty() {
        return line_windows(text, params, 0);
    }

    // Greedily group consecutive segments into windows of at most max_chars;
    // a single oversize segment is split by line windows.
    let mut out: Vec<RawPiece> = Vec::new();
    let mut group: Option<(usize, usize, usize)> = None; // (start, end, chars)

    let seg_text = |start: usize, end: usize| lines[start..=end].join("\n");

    let flush = |group: &mut Option<(usize, usize, usize)>, out: &mut Vec<RawPiece>| {
        if let Some((start, end, _)) = group.take() {
            out.push(RawPiece {
                content: seg_text(start, end),
                start_line: start as u32 + 1,
                end_line: end as u32 + 1,
            });
        }
    };

    for (start, end) in segments {
        let chars = seg_text(start, end).len();
        if chars > params.max_chars {
            flush(&mut group, &mut out);
            let body = seg_text(start, end);
            for piece in line_windows(&body, params, start as u32) {
                out.push(piece);
            }
            continue;
        }
        match group {
            Some((g_start, _, g_chars)) if g_chars + chars + 1 <= params.max_chars => {
                group = Some((g_start, end, g_chars + chars + 1));
            }
            Some(_) => {
                flush(&mut group, &mut out);
                group = Some((start, end, chars));
            }
            None => group = Some((start, end, chars)),
        }
    }
    flush(&mut group, &mut out);

    out
}

// ============ Markdown / prose chunking ============

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#') && trimmed.chars().take_while(|c| *c == '#').count() <= 6
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Heading-bounded windows: sections start at headings outside code fences;
/// small consecutive sections are grouped, oversize sections fall back to
/// fence-aware line windows.
fn heading_windows(text: &str, params: &ChunkParams) -> Vec<RawPiece> {
    let lines: Vec<&str> = text.lines().collect();

    // Section boundaries (line indices of headings outside fences).
    let mut sections: Vec<(usize, usize)> = Vec::new();
    let mut section_start = 0usize;
    let mut in_fence = false;
    for (i, line) in lines.iter().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && is_heading(line) && i > section_start {
            sections.push((section_start, i - 1));
            section_start = i;
        }
    }
    if section_start < lines.len() {
        sections.push((section_start, lines.len() - 1));
    }

    let seg_text = |start: usize, end: usize| lines[start..=end].join("\n");

    let mut out: Vec<RawPiece> = Vec::new();
    let mut group: Option<(usize, usize, usize)> = None;

    let flush = |group: &mut Option<(usize, usize, usize)>, out: &mut Vec<RawPiece>| {
        if let Some((start, end, _)) = group.take() {
            out.push(RawPiece {
                content: seg_text(start, end),
                start_line: start as u32 + 1,
                end_line: end as u32 + 1,
            });
        }
    };

    for (start, end) in sections {
        let chars = seg_text(start, end).len();
        if chars > params.max_chars {
            flush(&mut group, &mut out);
            let body = seg_text(start, end);
            for piece in line_windows(&body, params, start as u32) {
                out.push(piece);
            }
            continue;
        }
        match group {
            Some((g_start, _, g_chars)) if g_chars + chars + 1 <= params.max_chars => {
                group = Some((g_start, end, g_chars + chars + 1));
            }
            Some(_) => {
                flush(&mut group, &mut out);
                group = Some((start, end, chars));
            }
            None => group = Some((start, end, chars)),
        }
    }
    flush(&mut group, &mut out);

    out
}

// ============ Line-window fallback ============

/// Accumulate lines into windows of at most `max_chars`, overlapping adjacent
/// windows by trailing lines up to `overlap_chars`. Fences stay atomic unless
/// a single fenced block would push a window past `2 × max_chars`.
///
/// `line_offset` shifts reported line numbers when windowing a slice of a
/// larger source.
fn line_windows(text: &str, params: &ChunkParams, line_offset: u32) -> Vec<RawPiece> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<RawPiece> = Vec::new();
    let mut buf: Vec<(usize, &str)> = Vec::new();
    let mut buf_chars = 0usize;
    let mut in_fence = false;

    let flush =
        |buf: &mut Vec<(usize, &str)>, buf_chars: &mut usize, out: &mut Vec<RawPiece>| {
            if buf.is_empty() {
                return;
            }
            let start = buf[0].0;
            let end = buf[buf.len() - 1].0;
            out.push(RawPiece {
                content: buf.iter().map(|(_, l)| *l).collect::<Vec<_>>().join("\n"),
                start_line: start as u32 + 1 + line_offset,
                end_line: end as u32 + 1 + line_offset,
            });
            // Seed the next window with trailing overlap lines.
            let mut keep: Vec<(usize, &str)> = Vec::new();
            let mut kept = 0usize;
            for &(i, line) in buf.iter().rev() {
                if kept + line.len() > params.overlap_chars {
                    break;
                }
                kept += line.len() + 1;
                keep.push((i, line));
            }
            keep.reverse();
            *buf_chars = keep.iter().map(|(_, l)| l.len() + 1).sum();
            *buf = keep;
        };

    for (i, line) in lines.iter().enumerate() {
        let fence_line = is_fence(line);
        let would_be = buf_chars + line.len() + 1;

        let hard_cap = 2 * params.max_chars;
        let over_soft = would_be > params.max_chars && !buf.is_empty();
        let over_hard = would_be > hard_cap && !buf.is_empty();
        if (over_soft && !in_fence) || over_hard {
            flush(&mut buf, &mut buf_chars, &mut out);
        }

        if fence_line {
            in_fence = !in_fence;
        }
        buf_chars += line.len() + 1;
        buf.push((i, line));
    }

    // Final flush without seeding overlap.
    if !buf.is_empty() {
        let start = buf[0].0;
        let end = buf[buf.len() - 1].0;
        let content = buf.iter().map(|(_, l)| *l).collect::<Vec<_>>().join("\n");
        // The overlap seed alone is not a chunk: skip a trailing window that
        // is a strict suffix of the previous chunk.
        let redundant = out
            .last()
            .map(|prev| prev.content.ends_with(&content))
            .unwrap_or(false);
        if !redundant {
            out.push(RawPiece {
                content,
                start_line: start as u32 + 1 + line_offset,
                end_line: end as u32 + 1 + line_offset,
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max: usize, overlap: usize, mode: ChunkerMode) -> ChunkParams {
        ChunkParams {
            max_chars: max,
            overlap_chars: overlap,
            mode,
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let p = params(1000, 100, ChunkerMode::Ast);
        assert!(chunk_source("", Some("rust"), &p).is_empty());
        assert!(chunk_source("   \n  ", None, &p).is_empty());
    }

    #[test]
    fn small_file_is_one_chunk() {
        let p = params(1000, 100, ChunkerMode::Ast);
        let chunks = chunk_source("fn main() {}\n", Some("rust"), &p);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].start_line, 1);
        assert!(chunks[0].is_code);
        assert_eq!(chunks[0].language.as_deref(), Some("rust"));
    }

    #[test]
    fn deterministic() {
        let text = "fn a() { 1 }\n\nfn b() { 2 }\n\nfn c() { 3 }\n";
        let p = params(20, 5, ChunkerMode::Ast);
        let c1 = chunk_source(text, Some("rust"), &p);
        let c2 = chunk_source(text, Some("rust"), &p);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.content, b.content);
            assert_eq!(a.start_line, b.start_line);
        }
    }

    #[test]
    fn indices_are_contiguous() {
        let text = (0..60)
            .map(|i| format!("line number {i} with some padding text"))
            .collect::<Vec<_>>()
            .join("\n");
        let p = params(120, 30, ChunkerMode::Character);
        let chunks = chunk_source(&text, Some("text"), &p);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn rust_functions_get_own_chunks_when_max_is_small() {
        let text = "fn alpha() {\n    println!(\"a\");\n}\n\nfn beta() {\n    println!(\"b\");\n}\n";
        let p = params(40, 0, ChunkerMode::Ast);
        let chunks = chunk_source(text, Some("rust"), &p);
        assert!(chunks.len() >= 2, "expected per-function chunks");
        assert!(chunks[0].content.contains("alpha"));
        assert!(chunks[1].content.contains("beta"));
        // Spans are 1-based and ordered.
        assert!(chunks[0].start_line < chunks[1].start_line);
    }

    #[test]
    fn markdown_splits_on_headings() {
        let text = "# Intro\nsome intro text\n\n# Usage\nusage text here\n\n# Appendix\nmore\n";
        let p = params(30, 0, ChunkerMode::Semantic);
        let chunks = chunk_source(text, Some("markdown"), &p);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].content.starts_with("# Intro"));
        assert!(!chunks[0].is_code);
    }

    #[test]
    fn fenced_block_stays_atomic() {
        let code_block = "```rust\nfn x() {}\nfn y() {}\nfn z() {}\n```";
        let text = format!("# Title\nintro\n\n{code_block}\n\ntail text\n");
        let p = params(30, 0, ChunkerMode::Semantic);
        let chunks = chunk_source(&text, Some("markdown"), &p);
        let with_fence: Vec<&ChunkPiece> = chunks
            .iter()
            .filter(|c| c.content.contains("```"))
            .collect();
        for c in &with_fence {
            let fence_count = c.content.matches("```").count();
            assert_eq!(fence_count % 2, 0, "fence split mid-block: {:?}", c.content);
        }
    }

    #[test]
    fn no_chunk_exceeds_twice_max() {
        let text = (0..200)
            .map(|i| format!("somewhat long line of filler content number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let p = params(200, 40, ChunkerMode::Character);
        for c in chunk_source(&text, Some("text"), &p) {
            assert!(c.content.len() <= 2 * p.max_chars, "len={}", c.content.len());
        }
    }

    #[test]
    fn adjacent_windows_overlap() {
        let text = (0..40)
            .map(|i| format!("line {i:02} padded to be meaningful"))
            .collect::<Vec<_>>()
            .join("\n");
        let p = params(150, 60, ChunkerMode::Character);
        let chunks = chunk_source(&text, Some("text"), &p);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(
                pair[1].start_line <= pair[0].end_line + 1,
                "gap between windows"
            );
        }
    }

    #[test]
    fn parse_failure_falls_back_to_windows() {
        // Valid grammar but unparseable garbage still yields chunks.
        let text = "%%%% not rust at all {{{{\nmore garbage\n";
        let p = params(1000, 100, ChunkerMode::Ast);
        let chunks = chunk_source(text, Some("rust"), &p);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn unknown_language_uses_line_windows() {
        let text = "line one\nline two\n";
        let p = params(1000, 100, ChunkerMode::Ast);
        let chunks = chunk_source(text, Some("go"), &p);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_code);
    }
}
