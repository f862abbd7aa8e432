//! Path parsing for declared routes.
//!
//! A declared path such as `/timesheets/{id}` becomes a [`PathSpec`]: an
//! ordered list of [`Segment`]s. Segments are matched against remote nodes by
//! their exact path-part text, so `{id}` and `{uid}` are different segments
//! even though both are parameters.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Parameter { name: String, greedy: bool },
}

impl Segment {
    /// Text stored on the remote node for this segment.
    pub fn path_part(&self) -> String {
        match self {
            Self::Literal(text) => text.clone(),
            Self::Parameter { name, greedy: false } => format!("{{{name}}}"),
            Self::Parameter { name, greedy: true } => format!("{{{name}+}}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSpec {
    segments: Vec<Segment>,
}

impl PathSpec {
    pub fn parse(path: &str) -> Result<Self, ParseError> {
        parse_path(path)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false for a parsed path; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path with every parameter segment replaced by `*`, as used in
    /// execute-api source ARNs.
    pub fn wildcard_path(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.as_str(),
                Segment::Parameter { .. } => "*",
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", segment.path_part())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("path `{path}` must start with `/`")]
    MissingLeadingSlash { path: String },
    #[error("path `{path}` has an empty segment at position {position}")]
    EmptySegment { path: String, position: usize },
    #[error("path `{path}` has an invalid segment `{segment}`: {reason}")]
    InvalidSegment {
        path: String,
        segment: String,
        reason: &'static str,
    },
    #[error("path `{path}` has a malformed parameter `{segment}`: {reason}")]
    MalformedParameter {
        path: String,
        segment: String,
        reason: &'static str,
    },
    #[error("path `{path}` uses greedy parameter `{segment}` before the last segment")]
    GreedyNotLast { path: String, segment: String },
}

pub fn parse_path(path: &str) -> Result<PathSpec, ParseError> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(ParseError::MissingLeadingSlash {
            path: path.to_string(),
        });
    };

    let raw_segments: Vec<&str> = rest.split('/').collect();
    let last_position = raw_segments.len() - 1;
    let mut segments = Vec::with_capacity(raw_segments.len());

    for (position, raw) in raw_segments.into_iter().enumerate() {
        if raw.is_empty() {
            return Err(ParseError::EmptySegment {
                path: path.to_string(),
                position,
            });
        }

        let segment = parse_segment(path, raw)?;
        if let Segment::Parameter { greedy: true, .. } = segment {
            if position != last_position {
                return Err(ParseError::GreedyNotLast {
                    path: path.to_string(),
                    segment: raw.to_string(),
                });
            }
        }
        segments.push(segment);
    }

    Ok(PathSpec { segments })
}

fn parse_segment(path: &str, raw: &str) -> Result<Segment, ParseError> {
    let malformed = |reason| ParseError::MalformedParameter {
        path: path.to_string(),
        segment: raw.to_string(),
        reason,
    };

    if !raw.starts_with('{') {
        if raw.contains('{') || raw.contains('}') {
            return Err(malformed("unbalanced braces"));
        }
        if raw
            .chars()
            .any(|ch| ch.is_whitespace() || ch.is_control() || ch == '?' || ch == '#')
        {
            return Err(ParseError::InvalidSegment {
                path: path.to_string(),
                segment: raw.to_string(),
                reason: "contains whitespace, control, `?` or `#` characters",
            });
        }
        return Ok(Segment::Literal(raw.to_string()));
    }

    let Some(inner) = raw
        .strip_prefix('{')
        .and_then(|value| value.strip_suffix('}'))
    else {
        return Err(malformed("unbalanced braces"));
    };
    if inner.contains('{') || inner.contains('}') {
        return Err(malformed("nested braces"));
    }

    let (name, greedy) = match inner.strip_suffix('+') {
        Some(name) => (name, true),
        None => (inner, false),
    };
    if name.is_empty() {
        return Err(malformed("empty parameter name"));
    }
    if !name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
    {
        return Err(malformed("parameter name must be alphanumeric, `_`, `.` or `-`"));
    }

    Ok(Segment::Parameter {
        name: name.to_string(),
        greedy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literal_and_parameter_segments() {
        let spec = parse_path("/timesheets/{id}").expect("path should parse");

        assert_eq!(
            spec.segments(),
            &[
                Segment::Literal("timesheets".to_string()),
                Segment::Parameter {
                    name: "id".to_string(),
                    greedy: false
                },
            ]
        );
        assert_eq!(spec.to_string(), "/timesheets/{id}");
    }

    #[test]
    fn parses_health_route_and_greedy_tail() {
        let health = parse_path("/_health/users").expect("health path should parse");
        assert_eq!(health.len(), 2);

        let proxy = parse_path("/files/{proxy+}").expect("greedy path should parse");
        assert_eq!(proxy.segments()[1].path_part(), "{proxy+}");
        assert_eq!(proxy.wildcard_path(), "files/*");
    }

    #[test]
    fn rejects_missing_leading_slash() {
        assert!(matches!(
            parse_path("users"),
            Err(ParseError::MissingLeadingSlash { .. })
        ));
        assert!(matches!(
            parse_path(""),
            Err(ParseError::MissingLeadingSlash { .. })
        ));
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(matches!(
            parse_path("/"),
            Err(ParseError::EmptySegment { position: 0, .. })
        ));
        assert!(matches!(
            parse_path("/a//b"),
            Err(ParseError::EmptySegment { position: 1, .. })
        ));
        assert!(matches!(
            parse_path("/a/"),
            Err(ParseError::EmptySegment { position: 1, .. })
        ));
    }

    #[test]
    fn rejects_malformed_parameters() {
        for path in ["/a/{id", "/a/id}", "/a/{}", "/a/x{id}", "/a/{{id}}", "/a/{+}", "/a/{i d}"] {
            assert!(
                matches!(parse_path(path), Err(ParseError::MalformedParameter { .. })),
                "expected malformed parameter for {path}"
            );
        }
    }

    #[test]
    fn rejects_greedy_parameter_before_last_segment() {
        assert!(matches!(
            parse_path("/a/{rest+}/b"),
            Err(ParseError::GreedyNotLast { .. })
        ));
    }

    #[test]
    fn rejects_whitespace_in_literals() {
        assert!(matches!(
            parse_path("/a b"),
            Err(ParseError::InvalidSegment { .. })
        ));
    }

    #[test]
    fn differently_named_parameters_are_distinct() {
        let by_id = parse_path("/items/{id}").expect("path should parse");
        let by_sku = parse_path("/items/{sku}").expect("path should parse");

        assert_ne!(by_id, by_sku);
        assert_ne!(by_id.segments()[1].path_part(), by_sku.segments()[1].path_part());
        assert_eq!(by_id.wildcard_path(), by_sku.wildcard_path());
    }
}
