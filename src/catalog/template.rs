//! Command syntax templates.
//!
//! A template is the catalog's description of one command spelling:
//!
//! - `word` is a literal keyword
//! - `<name>` is one token of the parameter's kind
//! - `<name...>` is a space separated list
//! - `<name*>` captures the rest of the line
//! - `key=<name>` is a `key=value` segment
//! - `{word}` is a flag keyword bound to the flag parameter `word`
//! - `[ ... ]` is an optional, nestable group
//!
//! The same parsed template drives both directions: it compiles to the
//! matcher's regex and it renders canonical command text.

use crate::error::{Error, Result};
use indexmap::IndexMap;

/// How many tokens a placeholder consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    One,
    List,
    Rest,
}

/// One element of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder { name: String, arity: Arity },
    KeyValue { key: String, name: String },
    Flag(String),
    Optional(Vec<Segment>),
}

impl Segment {
    fn bound_name(&self) -> Option<&str> {
        match self {
            Segment::Placeholder { name, .. } | Segment::KeyValue { name, .. } => Some(name),
            Segment::Flag(word) => Some(word),
            _ => None,
        }
    }
}

/// A parsed command template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parses template text.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source);
        if tokens.is_empty() {
            return Err(Error::template(source, "empty template"));
        }
        let mut pos = 0;
        let segments = parse_segments(source, &tokens, &mut pos, 0)?;
        if pos != tokens.len() {
            return Err(Error::template(source, "unbalanced ']'"));
        }
        if !matches!(segments.first(), Some(Segment::Literal(_))) {
            return Err(Error::template(source, "must start with a keyword"));
        }

        let template = Self {
            source: tokens.join(" ").replace("[ ", "[").replace(" ]", "]"),
            segments,
        };
        let mut seen = Vec::new();
        for (name, _) in template.placeholders() {
            if seen.contains(&name) {
                return Err(Error::template(source, format!("'{}' bound twice", name)));
            }
            seen.push(name);
        }
        Ok(template)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The leading keyword, used to bucket patterns in the matcher.
    pub fn head(&self) -> &str {
        match self.segments.first() {
            Some(Segment::Literal(word)) => word,
            _ => "",
        }
    }

    /// Every bound name in template order, with its arity.
    ///
    /// Key=value segments and flags report `Arity::One`.
    pub fn placeholders(&self) -> Vec<(&str, Arity)> {
        let mut out = Vec::new();
        collect_placeholders(&self.segments, &mut out);
        out
    }

    /// Names bound to `{flag}` segments.
    pub fn flags(&self) -> Vec<&str> {
        fn walk<'a>(segments: &'a [Segment], out: &mut Vec<&'a str>) {
            for segment in segments {
                match segment {
                    Segment::Flag(word) => out.push(word),
                    Segment::Optional(inner) => walk(inner, out),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.segments, &mut out);
        out
    }

    /// Whether the name is bound only inside optional groups.
    pub fn is_optional(&self, name: &str) -> bool {
        !self
            .segments
            .iter()
            .any(|s| s.bound_name() == Some(name))
    }

    /// Builds the anchored regex source. `token` returns the regex for one
    /// token of the named parameter.
    pub fn regex_source<F>(&self, token: F) -> Result<String>
    where
        F: Fn(&str) -> Result<String>,
    {
        let body = segments_regex(&self.segments, &token)?;
        Ok(format!(r"^\s*{}\s*$", body))
    }

    /// Renders command text. A value equal to `defaults(name)` counts as
    /// absent when deciding whether an optional group is emitted.
    pub fn render<D>(&self, values: &IndexMap<String, String>, defaults: D) -> Result<String>
    where
        D: Fn(&str) -> Option<String>,
    {
        let mut words = Vec::new();
        render_segments(self, &self.segments, values, &defaults, &mut words)?;
        Ok(words.join(" "))
    }
}

fn tokenize(source: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in source.chars() {
        match c {
            '[' | ']' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_segments(
    source: &str,
    tokens: &[String],
    pos: &mut usize,
    depth: usize,
) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    while *pos < tokens.len() {
        let token = tokens[*pos].as_str();
        *pos += 1;
        match token {
            "[" => {
                let inner = parse_segments(source, tokens, pos, depth + 1)?;
                if inner.is_empty() {
                    return Err(Error::template(source, "empty optional group"));
                }
                segments.push(Segment::Optional(inner));
            }
            "]" => {
                if depth == 0 {
                    return Err(Error::template(source, "unbalanced ']'"));
                }
                return Ok(segments);
            }
            _ => segments.push(parse_token(source, token)?),
        }
    }
    if depth > 0 {
        return Err(Error::template(source, "unclosed '['"));
    }
    Ok(segments)
}

fn parse_token(source: &str, token: &str) -> Result<Segment> {
    if let Some(inner) = token.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        let (name, arity) = if let Some(name) = inner.strip_suffix("...") {
            (name, Arity::List)
        } else if let Some(name) = inner.strip_suffix('*') {
            (name, Arity::Rest)
        } else {
            (inner, Arity::One)
        };
        check_name(source, name)?;
        return Ok(Segment::Placeholder {
            name: name.to_string(),
            arity,
        });
    }
    if let Some((key, value)) = token.split_once('=') {
        let name = value
            .strip_prefix('<')
            .and_then(|v| v.strip_suffix('>'))
            .ok_or_else(|| Error::template(source, format!("bad key=value segment '{}'", token)))?;
        check_name(source, name)?;
        return Ok(Segment::KeyValue {
            key: key.to_string(),
            name: name.to_string(),
        });
    }
    if let Some(word) = token.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        check_name(source, word)?;
        return Ok(Segment::Flag(word.to_string()));
    }
    if token.contains(['<', '>', '{', '}']) {
        return Err(Error::template(source, format!("stray bracket in '{}'", token)));
    }
    Ok(Segment::Literal(token.to_string()))
}

fn check_name(source: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(Error::template(source, format!("invalid parameter name '{}'", name)))
    }
}

fn collect_placeholders<'a>(segments: &'a [Segment], out: &mut Vec<(&'a str, Arity)>) {
    for segment in segments {
        match segment {
            Segment::Placeholder { name, arity } => out.push((name, *arity)),
            Segment::KeyValue { name, .. } => out.push((name, Arity::One)),
            Segment::Flag(word) => out.push((word, Arity::One)),
            Segment::Optional(inner) => collect_placeholders(inner, out),
            Segment::Literal(_) => {}
        }
    }
}

fn segments_regex<F>(segments: &[Segment], token: &F) -> Result<String>
where
    F: Fn(&str) -> Result<String>,
{
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let piece = match segment {
            Segment::Literal(word) => regex::escape(word),
            Segment::Placeholder { name, arity } => {
                let one = token(name)?;
                match arity {
                    Arity::One => format!("(?P<{}>{})", name, one),
                    Arity::List => format!(r"(?P<{}>(?:{})(?:\s+(?:{}))*)", name, one, one),
                    Arity::Rest => format!(r"(?P<{}>\S(?:.*\S)?)", name),
                }
            }
            Segment::KeyValue { key, name } => {
                format!("{}=(?P<{}>{})", regex::escape(key), name, token(name)?)
            }
            Segment::Flag(word) => format!("(?P<{}>{})", word, regex::escape(word)),
            Segment::Optional(inner) => {
                let inner = segments_regex(inner, token)?;
                if i == 0 {
                    format!(r"(?:{}\s+)?", inner)
                } else {
                    out.push_str(&format!(r"(?:\s+{})?", inner));
                    continue;
                }
            }
        };
        if i > 0 {
            let leading_optional = matches!(segments.get(i - 1), Some(Segment::Optional(_)))
                && i == 1;
            if !leading_optional {
                out.push_str(r"\s+");
            }
        }
        out.push_str(&piece);
    }
    Ok(out)
}

fn has_value<D>(name: &str, values: &IndexMap<String, String>, defaults: &D) -> bool
where
    D: Fn(&str) -> Option<String>,
{
    match values.get(name) {
        Some(v) if !v.is_empty() => defaults(name).as_deref() != Some(v.as_str()),
        _ => false,
    }
}

fn group_is_set<D>(segments: &[Segment], values: &IndexMap<String, String>, defaults: &D) -> bool
where
    D: Fn(&str) -> Option<String>,
{
    segments.iter().any(|segment| match segment {
        Segment::Optional(inner) => group_is_set(inner, values, defaults),
        other => other
            .bound_name()
            .map(|name| has_value(name, values, defaults))
            .unwrap_or(false),
    })
}

fn render_segments<D>(
    template: &Template,
    segments: &[Segment],
    values: &IndexMap<String, String>,
    defaults: &D,
    words: &mut Vec<String>,
) -> Result<()>
where
    D: Fn(&str) -> Option<String>,
{
    let required = |name: &str| -> Result<String> {
        values
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| Error::template(&template.source, format!("missing value for '{}'", name)))
    };

    for segment in segments {
        match segment {
            Segment::Literal(word) => words.push(word.clone()),
            Segment::Placeholder { name, .. } => words.push(required(name)?),
            Segment::KeyValue { key, name } => words.push(format!("{}={}", key, required(name)?)),
            Segment::Flag(word) => {
                if has_value(word, values, defaults) {
                    words.push(word.clone());
                }
            }
            Segment::Optional(inner) => {
                if group_is_set(inner, values, defaults) {
                    render_segments(template, inner, values, defaults, words)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn values(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn no_defaults(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_segments() {
        let t = Template::parse("ip route <destination> gateway <gateway> [weight <weight>] [{hide}]")
            .unwrap();
        assert_eq!(t.head(), "ip");
        assert_eq!(
            t.placeholders(),
            vec![
                ("destination", Arity::One),
                ("gateway", Arity::One),
                ("weight", Arity::One),
                ("hide", Arity::One),
            ]
        );
        assert_eq!(t.flags(), vec!["hide"]);
        assert!(t.is_optional("weight"));
        assert!(!t.is_optional("gateway"));
    }

    #[test]
    fn test_brackets_may_touch_tokens() {
        let t = Template::parse("x <a> [<b> [<c>]]").unwrap();
        assert_eq!(t.source(), "x <a> [<b> [<c>]]");
        assert_eq!(t.segments().len(), 3);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Template::parse("").is_err());
        assert!(Template::parse("x [<a>").is_err());
        assert!(Template::parse("x <a>]").is_err());
        assert!(Template::parse("<a> x").is_err());
        assert!(Template::parse("x <a> <a>").is_err());
        assert!(Template::parse("x key=value").is_err());
        assert!(Template::parse("x <bad-name>").is_err());
    }

    #[test]
    fn test_regex_source() {
        let t = Template::parse("dns server <servers...> [edns=<edns>]").unwrap();
        let source = t
            .regex_source(|name| {
                Ok(match name {
                    "servers" => r"\d+".to_string(),
                    _ => "on|off".to_string(),
                })
            })
            .unwrap();
        let re = regex::Regex::new(&source).unwrap();
        let caps = re.captures("dns server 1 2 3 edns=on").unwrap();
        assert_eq!(&caps["servers"], "1 2 3");
        assert_eq!(&caps["edns"], "on");
        assert!(re.is_match("  dns server 1  "));
        assert!(!re.is_match("dns server"));
    }

    #[test]
    fn test_rest_placeholder() {
        let t = Template::parse("description <text*>").unwrap();
        let re = regex::Regex::new(&t.regex_source(|_| Ok(r"\S+".to_string())).unwrap()).unwrap();
        let caps = re.captures("description to branch office ").unwrap();
        assert_eq!(&caps["text"], "to branch office");
    }

    #[test]
    fn test_render_optional_groups() {
        let t = Template::parse("f <n> <src> [<sport> [<dport>]] [{established}]").unwrap();
        assert_eq!(
            t.render(&values(&[("n", "1"), ("src", "*")]), no_defaults).unwrap(),
            "f 1 *"
        );
        assert_eq!(
            t.render(
                &values(&[("n", "1"), ("src", "*"), ("sport", "*"), ("dport", "www")]),
                no_defaults
            )
            .unwrap(),
            "f 1 * * www"
        );
        assert_eq!(
            t.render(
                &values(&[("n", "1"), ("src", "*"), ("established", "established")]),
                no_defaults
            )
            .unwrap(),
            "f 1 * established"
        );
    }

    #[test]
    fn test_render_skips_default_groups() {
        let t = Template::parse("r <d> [weight <weight>]").unwrap();
        let defaults = |name: &str| (name == "weight").then(|| "1".to_string());
        assert_eq!(
            t.render(&values(&[("d", "default"), ("weight", "1")]), defaults)
                .unwrap(),
            "r default"
        );
        assert_eq!(
            t.render(&values(&[("d", "default"), ("weight", "5")]), defaults)
                .unwrap(),
            "r default weight 5"
        );
    }

    #[test]
    fn test_render_missing_required() {
        let t = Template::parse("r <d> gateway <g>").unwrap();
        let err = t.render(&values(&[("d", "default")]), no_defaults).unwrap_err();
        assert!(matches!(err, Error::Template { .. }));
    }
}
