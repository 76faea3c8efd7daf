//! Job Description Parser
//!
//! Reads job descriptions from disk. Two formats are accepted:
//! - AliEn JDL (classad-like `Name = value;` attributes), the default
//! - YAML mappings (`.yaml` / `.yml`), handy for hand-written campaigns
//!
//! The JDL reader works on the tokens of [`super::lexer`] and understands
//! string, integer, list (`{ ... }`) and nested record (`[ ... ]`) values. Any other classad expression (for
//! example `Requirements = member(other.GridPartitions, "PDC08");`) is
//! kept verbatim as text, since the generator never evaluates it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info};

use super::lexer::{line_of, tokenize, Spanned, Token};
use super::model::{JobDescription, Value};
use crate::error::{GeneratorError, Result};

/// Input format of a job description file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionFormat {
    Jdl,
    Yaml,
}

impl DescriptionFormat {
    /// Picks the format from the file extension; JDL unless YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                DescriptionFormat::Yaml
            }
            _ => DescriptionFormat::Jdl,
        }
    }
}

/// Loads and parses a job description file.
///
/// # Example
///
/// ```rust,no_run
/// use jdl2makeflow::description::load_description;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let raw = load_description("sim.jdl")?;
///     println!("{} attributes", raw.len());
///     Ok(())
/// }
/// ```
pub fn load_description(path: impl AsRef<Path>) -> Result<JobDescription> {
    let path = path.as_ref();
    info!("Loading job description from: {}", path.display());

    let text = fs::read_to_string(path).map_err(|e| {
        GeneratorError::Config(format!(
            "failed to read job description '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;
    debug!("Job description loaded ({} bytes)", text.len());

    let desc = parse_description(&text, DescriptionFormat::from_path(path))?;
    info!("Parsed {} attributes", desc.len());
    Ok(desc)
}

/// Parses job description text.
pub fn parse_description(text: &str, format: DescriptionFormat) -> Result<JobDescription> {
    match format {
        DescriptionFormat::Jdl => parse_jdl(text),
        DescriptionFormat::Yaml => parse_yaml(text),
    }
}

/// Parses AliEn JDL text.
pub fn parse_jdl(text: &str) -> Result<JobDescription> {
    let mut parser = JdlParser::new(text)?;
    let mut desc = JobDescription::new();
    for (name, value) in parser.parse_document()? {
        desc.insert(name, value);
    }
    Ok(desc)
}

/// Parses a YAML mapping.
pub fn parse_yaml(text: &str) -> Result<JobDescription> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| GeneratorError::Parse(e.to_string()))?;
    let Value::Map(map) = convert_yaml(doc)? else {
        return Err(GeneratorError::Parse(
            "YAML job description must be a mapping".to_string(),
        ));
    };
    let mut desc = JobDescription::new();
    for (name, value) in map {
        desc.insert(name, value);
    }
    Ok(desc)
}

fn convert_yaml(value: serde_yaml::Value) -> Result<Value> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Text(String::new()),
        Yaml::Bool(b) => Value::Text(b.to_string()),
        Yaml::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Text(n.to_string()),
        },
        Yaml::String(s) => Value::Text(s),
        Yaml::Sequence(items) => {
            Value::List(items.into_iter().map(convert_yaml).collect::<Result<_>>()?)
        }
        Yaml::Mapping(mapping) => {
            let mut map = BTreeMap::new();
            for (k, v) in mapping {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => {
                        return Err(GeneratorError::Parse(format!(
                            "unsupported YAML mapping key: {:?}",
                            other
                        )))
                    }
                };
                map.insert(key, convert_yaml(v)?);
            }
            Value::Map(map)
        }
        Yaml::Tagged(tagged) => convert_yaml(tagged.value)?,
    })
}

/// Recursive descent reader over JDL tokens.
struct JdlParser<'a> {
    source: &'a str,
    tokens: Vec<Spanned<Token>>,
    pos: usize,
}

impl<'a> JdlParser<'a> {
    fn new(source: &'a str) -> Result<Self> {
        Ok(Self {
            source,
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Error located at the current token, or at end of input.
    fn error(&self, msg: impl std::fmt::Display) -> GeneratorError {
        let at = self
            .tokens
            .get(self.pos)
            .map_or(self.source.len(), |t| t.span.start);
        GeneratorError::Parse(format!("line {}: {}", line_of(self.source, at), msg))
    }

    fn parse_document(&mut self) -> Result<Vec<(String, Value)>> {
        let bracketed = self.eat(&Token::LBracket);
        let attributes = self.parse_attributes(bracketed)?;
        if let Some(t) = self.tokens.get(self.pos) {
            return Err(self.error(format!(
                "unexpected '{}' after end of description",
                &self.source[t.span.clone()]
            )));
        }
        Ok(attributes)
    }

    /// Reads `Name = value;` pairs up to EOF, or up to `]` when `closed`.
    fn parse_attributes(&mut self, closed: bool) -> Result<Vec<(String, Value)>> {
        let mut attributes = Vec::new();
        loop {
            match self.peek() {
                None if closed => return Err(self.error("missing closing ']'")),
                None => break,
                Some(Token::RBracket) if closed => {
                    self.pos += 1;
                    break;
                }
                _ => {}
            }

            let name = match self.peek() {
                Some(Token::Ident(name)) => name.clone(),
                _ => return Err(self.error("expected attribute name")),
            };
            self.pos += 1;
            if !self.eat(&Token::Assign) {
                return Err(self.error(format!("expected '=' after {}", name)));
            }
            let value = self.parse_value(&[Token::Semi, Token::RBracket])?;
            debug!("JDL attribute {} = {:?}", name, value);
            attributes.push((name, value));

            if !self.eat(&Token::Semi) && !matches!(self.peek(), None | Some(Token::RBracket)) {
                return Err(self.error("expected ';' between attributes"));
            }
        }
        Ok(attributes)
    }

    fn at_terminator(&self, terminators: &[Token]) -> bool {
        self.peek().map_or(true, |t| terminators.contains(t))
    }

    fn parse_value(&mut self, terminators: &[Token]) -> Result<Value> {
        let start = self.pos;
        let literal = match self.peek() {
            Some(Token::LBrace) => return self.parse_list(),
            Some(Token::LBracket) => {
                self.pos += 1;
                let map = self.parse_attributes(true)?.into_iter().collect();
                return Ok(Value::Map(map));
            }
            Some(Token::Str(s)) => Some(Value::Text(s.clone())),
            Some(Token::Int(i)) => Some(Value::Integer(*i)),
            _ => None,
        };

        // A literal must stand alone; anything else is a raw expression.
        if let Some(value) = literal {
            self.pos += 1;
            if self.at_terminator(terminators) {
                return Ok(value);
            }
            self.pos = start;
        }
        self.parse_expression(terminators)
    }

    fn parse_list(&mut self) -> Result<Value> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            if self.eat(&Token::RBrace) {
                break;
            }
            items.push(self.parse_value(&[Token::Comma, Token::RBrace])?);
            if self.eat(&Token::Comma) {
                continue;
            }
            if self.eat(&Token::RBrace) {
                break;
            }
            return Err(self.error("expected ',' or '}' in list"));
        }
        Ok(Value::List(items))
    }

    /// Captures an unevaluated expression as its source text.
    fn parse_expression(&mut self, terminators: &[Token]) -> Result<Value> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token {
                Token::LParen | Token::LBrace | Token::LBracket => depth += 1,
                Token::RParen | Token::RBrace | Token::RBracket if depth > 0 => depth -= 1,
                t if depth == 0 && terminators.contains(t) => break,
                Token::RParen | Token::RBrace | Token::RBracket => {
                    let text = &self.source[self.tokens[self.pos].span.clone()];
                    return Err(self.error(format!("unbalanced '{}'", text)));
                }
                Token::Assign => return Err(self.error("expected ';' before next attribute")),
                _ => {}
            }
            self.pos += 1;
        }
        if depth > 0 {
            return Err(self.error("unbalanced brackets in expression"));
        }
        if self.pos == start {
            return Err(self.error("missing value"));
        }
        let from = self.tokens[start].span.start;
        let to = self.tokens[self.pos - 1].span.end;
        Ok(Value::Text(self.source[from..to].trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JDL: &str = r#"
# AliDPG Monte Carlo production
Executable = "/alice/cern.ch/user/a/aliprod/bin/aliroot_dpgsim.sh";
Packages = {
  "VO_ALICE@AliDPG::v5-09-XX-26",
  "VO_ALICE@jemalloc::v3.6.0",
};
TTL = 72000;
Split = "production:1-10";
SplitArguments = "--run 244918 --uid #alien_counter#";
// Requirements are kept as raw text
Requirements = member(other.GridPartitions, "PDC08_2");
OutputDir = "/alice/sim/2018/LHC18a1/244918/#alien_counter_03i#";
/* multi-line
   comment */
NextStages = { "FinalQA" };
"#;

    #[test]
    fn test_parse_sample_jdl() {
        let desc = parse_jdl(SAMPLE_JDL).unwrap();

        assert_eq!(
            desc.executable().unwrap(),
            "/alice/cern.ch/user/a/aliprod/bin/aliroot_dpgsim.sh"
        );
        assert_eq!(desc.packages().unwrap().len(), 2);
        assert_eq!(desc.get("TTL"), Some(&Value::Integer(72000)));
        assert_eq!(
            desc.get("Requirements"),
            Some(&Value::from("member(other.GridPartitions, \"PDC08_2\")"))
        );
        assert_eq!(desc.next_stages().unwrap(), vec!["FinalQA"]);
    }

    #[test]
    fn test_hash_inside_string_is_not_a_comment() {
        let desc = parse_jdl(r#"OutputDir = "/out/#alien_counter#";"#).unwrap();
        assert_eq!(desc.output_dir().unwrap(), "/out/#alien_counter#");
    }

    #[test]
    fn test_bracketed_document_and_nested_record() {
        let desc = parse_jdl(
            r#"[
              Executable = "run.sh";
              Meta = [ Owner = "aliprod"; Priority = 3 ];
            ]"#,
        )
        .unwrap();
        let meta = desc.get("Meta").and_then(Value::as_map).unwrap();
        assert_eq!(meta["Owner"], Value::from("aliprod"));
        assert_eq!(meta["Priority"], Value::Integer(3));
    }

    #[test]
    fn test_comparison_expression_kept_as_text() {
        let desc = parse_jdl(
            "Requirements = other.Type == \"machine\" && (other.TTL >= 3600);\nTTL = 5;",
        )
        .unwrap();
        assert_eq!(
            desc.get("Requirements"),
            Some(&Value::from("other.Type == \"machine\" && (other.TTL >= 3600)"))
        );
        assert_eq!(desc.get("TTL"), Some(&Value::Integer(5)));
    }

    #[test]
    fn test_escaped_quotes() {
        let desc = parse_jdl(r#"SplitArguments = "--title \"LHC18a1\"";"#).unwrap();
        assert_eq!(desc.split_arguments().unwrap(), "--title \"LHC18a1\"");
    }

    #[test]
    fn test_last_semicolon_is_optional() {
        let desc = parse_jdl("Executable = \"run.sh\"").unwrap();
        assert_eq!(desc.executable().unwrap(), "run.sh");
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_jdl("Executable \"run.sh\";").is_err());
        assert!(parse_jdl("Executable = \"run.sh;").is_err());
        assert!(parse_jdl("Packages = { \"a\", \"b\"").is_err());
        assert!(parse_jdl("[ Executable = \"run.sh\";").is_err());
        assert!(parse_jdl("Executable = ;").is_err());
        assert!(parse_jdl("A = 1; B = 2 C = 3;").is_err());
    }

    #[test]
    fn test_error_reports_line() {
        let err = parse_jdl("A = 1;\nB = 2\nC = 3;").unwrap_err();
        assert!(err.to_string().contains("line 3"), "{}", err);
    }

    #[test]
    fn test_parse_yaml_description() {
        let desc = parse_yaml(
            "Executable: run.sh\nSplit: production:1-4\nPackages:\n  - VO_ALICE@AliDPG::v5\nTTL: 3600\n",
        )
        .unwrap();
        assert_eq!(desc.executable().unwrap(), "run.sh");
        assert_eq!(desc.packages().unwrap(), vec!["VO_ALICE@AliDPG::v5"]);
        assert_eq!(desc.get("TTL"), Some(&Value::Integer(3600)));
    }

    #[test]
    fn test_yaml_must_be_mapping() {
        assert!(parse_yaml("- a\n- b\n").is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            DescriptionFormat::from_path(Path::new("sim.yml")),
            DescriptionFormat::Yaml
        );
        assert_eq!(
            DescriptionFormat::from_path(Path::new("sim.jdl")),
            DescriptionFormat::Jdl
        );
        assert_eq!(
            DescriptionFormat::from_path(Path::new("sim")),
            DescriptionFormat::Jdl
        );
    }

    #[test]
    fn test_load_description_missing_file() {
        let err = load_description("/nonexistent/sim.jdl").unwrap_err();
        assert!(err.to_string().contains("failed to read job description"));
    }
}
