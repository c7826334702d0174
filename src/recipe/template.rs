use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed placeholder at byte {0}")]
    Unclosed(usize),

    #[error("unmatched '}}' at byte {0}, write '}}}}' for a literal brace")]
    StrayClose(usize),

    #[error("invalid placeholder name '{0}'")]
    InvalidName(String),

    #[error("no value supplied for placeholder '{0}'")]
    MissingValue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Brace(char),
    Placeholder(&'a str),
}

fn segments(template: &str) -> Result<Vec<Segment<'_>>, TemplateError> {
    let bytes = template.as_bytes();
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        if byte != b'{' && byte != b'}' {
            i += 1;
            continue;
        }

        if text_start < i {
            segments.push(Segment::Text(&template[text_start..i]));
        }

        if bytes.get(i + 1) == Some(&byte) {
            segments.push(Segment::Brace(byte as char));
            i += 2;
        } else if byte == b'}' {
            return Err(TemplateError::StrayClose(i));
        } else {
            let close = template[i + 1..]
                .find('}')
                .map(|offset| i + 1 + offset)
                .ok_or(TemplateError::Unclosed(i))?;
            let name = &template[i + 1..close];

            let valid = !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(TemplateError::InvalidName(name.to_string()));
            }

            segments.push(Segment::Placeholder(name));
            i = close + 1;
        }

        text_start = i;
    }

    if text_start < bytes.len() {
        segments.push(Segment::Text(&template[text_start..]));
    }

    Ok(segments)
}

/// Placeholder names in order of first appearance
pub fn placeholders(template: &str) -> Result<Vec<&str>, TemplateError> {
    let mut names: Vec<&str> = Vec::new();
    for segment in segments(template)? {
        if let Segment::Placeholder(name) = segment {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// Substitute every placeholder with its value; `{{` and `}}` render as literal braces
pub fn render(template: &str, values: &HashMap<&str, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());

    for segment in segments(template)? {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Brace(brace) => out.push(brace),
            Segment::Placeholder(name) => {
                let value = values
                    .get(name)
                    .ok_or_else(|| TemplateError::MissingValue(name.to_string()))?;
                out.push_str(value);
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_in_order_without_duplicates() {
        let names = placeholders("{a} and {b_2}, again {a}").unwrap();
        assert_eq!(names, vec!["a", "b_2"]);
    }

    #[test]
    fn test_escaped_braces_are_not_placeholders() {
        let template = "Answer as {{\"track_ids\": [...]}} for {genre}";
        assert_eq!(placeholders(template).unwrap(), vec!["genre"]);

        let values = HashMap::from([("genre", "jazz".to_string())]);
        assert_eq!(
            render(template, &values).unwrap(),
            "Answer as {\"track_ids\": [...]} for jazz"
        );
    }

    #[test]
    fn test_malformed_templates() {
        assert_eq!(placeholders("oops {name"), Err(TemplateError::Unclosed(5)));
        assert_eq!(placeholders("oops }"), Err(TemplateError::StrayClose(5)));
        assert_eq!(
            placeholders("{\"ids\": 1}"),
            Err(TemplateError::InvalidName("\"ids\": 1".to_string()))
        );
        assert!(placeholders("{}").is_err());
    }

    #[test]
    fn test_render_requires_every_value() {
        let values = HashMap::from([("a", "1".to_string())]);
        assert_eq!(
            render("{a}{b}", &values),
            Err(TemplateError::MissingValue("b".to_string()))
        );
    }

    #[test]
    fn test_render_preserves_unicode_text() {
        let values = HashMap::from([("artist_names", "Björk, Sigur Rós".to_string())]);
        assert_eq!(
            render("Écoute {artist_names} ♫", &values).unwrap(),
            "Écoute Björk, Sigur Rós ♫"
        );
    }
}
