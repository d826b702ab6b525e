/// Extract the intent tag from a `notes.md` document.
///
/// Looks for the first non-empty, non-heading line after a `## Intent` heading, then falls back
/// to an `Intent: <tag>` line anywhere in the document.
pub fn intent_from_notes(notes: &str) -> Option<String> {
    let lines: Vec<&str> = notes.lines().collect();
    if let Some(pos) = lines.iter().position(|l| l.trim_start().starts_with("## Intent")) {
        let found = lines[pos + 1..]
            .iter()
            .map(|l| l.trim())
            .take_while(|l| !l.starts_with('#'))
            .find(|l| !l.is_empty());
        if let Some(line) = found {
            return Some(strip_markup(line));
        }
    }
    lines.iter().find_map(|l| {
        let t = l.trim();
        let rest = t.strip_prefix("Intent:").or_else(|| t.strip_prefix("intent:"))?;
        let rest = strip_markup(rest);
        (!rest.is_empty()).then_some(rest)
    })
}

fn strip_markup(s: &str) -> String {
    s.trim().trim_start_matches("- ").trim_matches('`').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_intent_section() {
        let notes = "# Scenario\n\n## Intent\n\n`high_to_low_level`\n\n## Other\nfoo\n";
        assert_eq!(intent_from_notes(notes).as_deref(), Some("high_to_low_level"));
    }

    #[test]
    fn empty_intent_section_falls_back_to_inline() {
        let notes = "## Intent\n## Next\nIntent: language_to_language\n";
        assert_eq!(intent_from_notes(notes).as_deref(), Some("language_to_language"));
    }

    #[test]
    fn no_intent() {
        assert_eq!(intent_from_notes("# just notes\nnothing here\n"), None);
    }
}
