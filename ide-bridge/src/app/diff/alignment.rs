use crate::domain::diff::{DiffSpan, SpanKind};
use similar::{DiffTag, TextDiff};

/// Line-level changed spans turning `original` into `proposed`.
///
/// A delete immediately followed by an insert at the same original position is reported
/// as a single replace.
pub fn align_lines(original: &str, proposed: &str) -> Vec<DiffSpan> {
    let diff = TextDiff::from_lines(original, proposed);
    let mut spans: Vec<DiffSpan> = Vec::new();
    for op in diff.ops() {
        let (tag, old_lines, new_lines) = op.as_tag_tuple();
        let kind = match tag {
            DiffTag::Equal => continue,
            DiffTag::Delete => SpanKind::Delete,
            DiffTag::Insert => SpanKind::Insert,
            DiffTag::Replace => SpanKind::Replace,
        };
        if let Some(last) = spans.last_mut() {
            let adjacent =
                last.old_lines.end == old_lines.start && last.new_lines.end == new_lines.start;
            if adjacent && last.kind != SpanKind::Insert && kind != SpanKind::Delete {
                last.kind = SpanKind::Replace;
                last.old_lines.end = old_lines.end;
                last.new_lines.end = new_lines.end;
                continue;
            }
        }
        spans.push(DiffSpan {
            kind,
            old_lines,
            new_lines,
        });
    }
    spans
}
