//! Line-based unified diff for golden mismatches.

const CONTEXT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

/// Edit script via longest common subsequence. Golden files are small enough for the quadratic
/// table.
fn edit_script(a: &[&str], b: &[&str]) -> Vec<Op> {
    let (n, m) = (a.len(), b.len());
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] { lcs[i + 1][j + 1] + 1 } else { lcs[i + 1][j].max(lcs[i][j + 1]) };
        }
    }
    let (mut i, mut j) = (0, 0);
    let mut ops = Vec::with_capacity(n + m);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.push(Op::Equal(i, j));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(Op::Delete(i));
            i += 1;
        } else {
            ops.push(Op::Insert(j));
            j += 1;
        }
    }
    ops.extend((i..n).map(Op::Delete));
    ops.extend((j..m).map(Op::Insert));
    ops
}

/// `---`/`+++` headers followed by `@@` hunks with three lines of context. Empty when equal.
pub fn unified_diff(a_name: &str, b_name: &str, a: &str, b: &str) -> String {
    let a_lines: Vec<&str> = a.lines().collect();
    let b_lines: Vec<&str> = b.lines().collect();
    let ops = edit_script(&a_lines, &b_lines);
    if ops.iter().all(|op| matches!(op, Op::Equal(..))) {
        return String::new();
    }

    // Group changes into hunks, merging those separated by at most 2*CONTEXT equal lines.
    let changes: Vec<usize> = ops.iter().enumerate().filter(|(_, op)| !matches!(op, Op::Equal(..))).map(|(k, _)| k).collect();
    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for &k in &changes {
        let start = k.saturating_sub(CONTEXT);
        let end = (k + CONTEXT + 1).min(ops.len());
        match hunks.last_mut() {
            Some((_, e)) if start <= *e => *e = end,
            _ => hunks.push((start, end)),
        }
    }

    let mut out = format!("--- {a_name}\n+++ {b_name}\n");
    for (start, end) in hunks {
        let slice = &ops[start..end];
        let a_start = slice.iter().find_map(|op| match op {
            Op::Equal(i, _) | Op::Delete(i) => Some(*i),
            Op::Insert(_) => None,
        });
        let b_start = slice.iter().find_map(|op| match op {
            Op::Equal(_, j) | Op::Insert(j) => Some(*j),
            Op::Delete(_) => None,
        });
        let a_count = slice.iter().filter(|op| !matches!(op, Op::Insert(_))).count();
        let b_count = slice.iter().filter(|op| !matches!(op, Op::Delete(_))).count();
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            range(a_start.unwrap_or_else(|| preceding_a(&ops, start)), a_count),
            range(b_start.unwrap_or_else(|| preceding_b(&ops, start)), b_count)
        ));
        for op in slice {
            match *op {
                Op::Equal(i, _) => out.push_str(&format!(" {}\n", a_lines[i])),
                Op::Delete(i) => out.push_str(&format!("-{}\n", a_lines[i])),
                Op::Insert(j) => out.push_str(&format!("+{}\n", b_lines[j])),
            }
        }
    }
    out
}

/// 1-based start line and count; an empty range points at the line before it.
fn range(start0: usize, count: usize) -> String {
    if count == 0 {
        format!("{start0},0")
    } else if count == 1 {
        format!("{}", start0 + 1)
    } else {
        format!("{},{}", start0 + 1, count)
    }
}

fn preceding_a(ops: &[Op], before: usize) -> usize {
    ops[..before]
        .iter()
        .filter(|op| !matches!(op, Op::Insert(_)))
        .count()
}

fn preceding_b(ops: &[Op], before: usize) -> usize {
    ops[..before]
        .iter()
        .filter(|op| !matches!(op, Op::Delete(_)))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_have_no_diff() {
        assert_eq!(unified_diff("a", "b", "x\ny\n", "x\ny\n"), "");
    }

    #[test]
    fn single_line_change_with_context() {
        let a = "1\n2\n3\n4\n5\n6\n7\n8\n";
        let b = "1\n2\n3\n4\nfive\n6\n7\n8\n";
        let d = unified_diff("expected/x.cpp", "target/x.cpp", a, b);
        assert_eq!(
            d,
            "--- expected/x.cpp\n+++ target/x.cpp\n@@ -2,7 +2,7 @@\n 2\n 3\n 4\n-5\n+five\n 6\n 7\n 8\n"
        );
    }

    #[test]
    fn insertion_into_empty_file() {
        let d = unified_diff("a", "b", "", "hello\n");
        assert_eq!(d, "--- a\n+++ b\n@@ -0,0 +1 @@\n+hello\n");
    }

    #[test]
    fn distant_changes_make_two_hunks() {
        let a: String = (1..=20).map(|i| format!("{i}\n")).collect();
        let b = a.replace("2\n", "two\n").replace("19\n", "nineteen\n");
        let d = unified_diff("a", "b", &a, &b);
        assert_eq!(d.matches("@@ -").count(), 2);
    }
}
