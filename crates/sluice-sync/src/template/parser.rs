//! Tokenizer and parser for the template language

use crate::error::{TransformError, TransformResult};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static END_RAW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%-?\s*endraw\s*-?%\}").expect("valid regex"));

static END_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%-?\s*endcomment\s*-?%\}").expect("valid regex"));

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Output(Expression),
    If {
        branches: Vec<(Condition, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Assign {
        name: String,
        value: Expression,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expression {
    pub operand: Operand,
    pub filters: Vec<FilterCall>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FilterCall {
    pub name: String,
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Literal(Value),
    Variable(Vec<Segment>),
    /// The `empty` keyword
    Empty,
    /// The `blank` keyword
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Key(String),
    Index(i64),
    Lookup(Box<Operand>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Condition {
    Test(Operand),
    Compare(Operand, CompareOp, Operand),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

// ============================================================================
// Markup scanning
// ============================================================================

#[derive(Debug, PartialEq)]
enum Markup {
    Text(String),
    Output(String),
    Tag(String),
}

#[derive(Clone, Copy, PartialEq)]
enum Delim {
    Output,
    Tag,
}

fn scan(source: &str) -> TransformResult<Vec<Markup>> {
    let mut out = Vec::new();
    let mut rest = source;
    let mut trim_next = false;

    loop {
        let next = match (rest.find("{{"), rest.find("{%")) {
            (Some(o), Some(t)) if o < t => Some((o, Delim::Output)),
            (Some(_), Some(t)) => Some((t, Delim::Tag)),
            (Some(o), None) => Some((o, Delim::Output)),
            (None, Some(t)) => Some((t, Delim::Tag)),
            (None, None) => None,
        };

        let Some((pos, delim)) = next else {
            let text = if trim_next { rest.trim_start() } else { rest };
            if !text.is_empty() {
                out.push(Markup::Text(text.to_string()));
            }
            return Ok(out);
        };

        let mut text = &rest[..pos];
        if trim_next {
            text = text.trim_start();
        }
        let mut after = &rest[pos + 2..];
        if let Some(stripped) = after.strip_prefix('-') {
            text = text.trim_end();
            after = stripped;
        }
        if !text.is_empty() {
            out.push(Markup::Text(text.to_string()));
        }

        let close = if delim == Delim::Output { "}}" } else { "%}" };
        let end = after.find(close).ok_or_else(|| {
            TransformError::syntax(format!("unterminated '{}'", &rest[pos..pos + 2]))
        })?;
        let mut inner = &after[..end];
        trim_next = inner.ends_with('-');
        if trim_next {
            inner = &inner[..inner.len() - 1];
        }
        let inner = inner.trim();
        rest = &after[end + 2..];

        match delim {
            Delim::Output => out.push(Markup::Output(inner.to_string())),
            Delim::Tag => match tag_name(inner) {
                "raw" => {
                    let m = END_RAW
                        .find(rest)
                        .ok_or_else(|| TransformError::syntax("'raw' tag was never closed"))?;
                    out.push(Markup::Text(rest[..m.start()].to_string()));
                    rest = &rest[m.end()..];
                    trim_next = false;
                }
                "comment" => {
                    let m = END_COMMENT.find(rest).ok_or_else(|| {
                        TransformError::syntax("'comment' tag was never closed")
                    })?;
                    rest = &rest[m.end()..];
                    trim_next = false;
                }
                _ => out.push(Markup::Tag(inner.to_string())),
            },
        }
    }
}

fn tag_name(markup: &str) -> &str {
    markup.split_whitespace().next().unwrap_or("")
}

// ============================================================================
// Block structure
// ============================================================================

/// Parse template source into a node list
pub(crate) fn parse(source: &str) -> TransformResult<Vec<Node>> {
    let mut builder = TreeBuilder {
        markup: scan(source)?.into_iter(),
    };
    let (nodes, _) = builder.block(&[])?;
    Ok(nodes)
}

struct TreeBuilder {
    markup: std::vec::IntoIter<Markup>,
}

type Terminator = (String, String);

impl TreeBuilder {
    fn block(&mut self, terminators: &[&str]) -> TransformResult<(Vec<Node>, Option<Terminator>)> {
        let mut nodes = Vec::new();
        while let Some(item) = self.markup.next() {
            match item {
                Markup::Text(text) => nodes.push(Node::Text(text)),
                Markup::Output(src) => nodes.push(Node::Output(parse_expression(&src)?)),
                Markup::Tag(src) => {
                    let name = tag_name(&src).to_string();
                    let args = src[name.len()..].trim().to_string();
                    if terminators.contains(&name.as_str()) {
                        return Ok((nodes, Some((name, args))));
                    }
                    match name.as_str() {
                        "if" => nodes.push(self.conditional(&args, false, "endif")?),
                        "unless" => nodes.push(self.conditional(&args, true, "endunless")?),
                        "assign" => nodes.push(parse_assign(&args)?),
                        other => {
                            return Err(TransformError::syntax(format!(
                                "unsupported tag '{other}'"
                            )))
                        }
                    }
                }
            }
        }
        match terminators.last() {
            Some(end) => Err(TransformError::syntax(format!("missing '{end}'"))),
            None => Ok((nodes, None)),
        }
    }

    fn conditional(&mut self, args: &str, negate: bool, end: &str) -> TransformResult<Node> {
        let mut branches = Vec::new();
        let mut condition = parse_condition(args)?;
        if negate {
            condition = Condition::Not(Box::new(condition));
        }
        loop {
            let (body, term) = self.block(&["elsif", "else", end])?;
            branches.push((condition, body));
            let Some((name, args)) = term else {
                return Err(TransformError::syntax(format!("missing '{end}'")));
            };
            match name.as_str() {
                "elsif" => condition = parse_condition(&args)?,
                "else" => {
                    let (otherwise, _) = self.block(&[end])?;
                    return Ok(Node::If {
                        branches,
                        otherwise,
                    });
                }
                _ => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    })
                }
            }
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(Value),
    Pipe,
    Colon,
    Comma,
    Dot,
    LBracket,
    RBracket,
    Op(CompareOp),
    Assign,
}

fn lex(src: &str) -> TransformResult<Vec<Tok>> {
    let chars: Vec<char> = src.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                toks.push(Tok::Pipe);
                i += 1;
            }
            ':' => {
                toks.push(Tok::Colon);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '.' => {
                toks.push(Tok::Dot);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(TransformError::syntax(format!(
                        "unterminated string in '{src}'"
                    )));
                }
                toks.push(Tok::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (tok, width) = match (c, next) {
                    ('=', Some('=')) => (Tok::Op(CompareOp::Eq), 2),
                    ('!', Some('=')) => (Tok::Op(CompareOp::Ne), 2),
                    ('<', Some('>')) => (Tok::Op(CompareOp::Ne), 2),
                    ('<', Some('=')) => (Tok::Op(CompareOp::Le), 2),
                    ('>', Some('=')) => (Tok::Op(CompareOp::Ge), 2),
                    ('<', _) => (Tok::Op(CompareOp::Lt), 1),
                    ('>', _) => (Tok::Op(CompareOp::Gt), 1),
                    ('=', _) => (Tok::Assign, 1),
                    _ => {
                        return Err(TransformError::syntax(format!(
                            "unexpected '{c}' in '{src}'"
                        )))
                    }
                };
                toks.push(tok);
                i += width;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    is_float = true;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let num = if is_float {
                    text.parse::<f64>().ok().map(Value::from)
                } else {
                    text.parse::<i64>().ok().map(Value::from)
                };
                let num =
                    num.ok_or_else(|| TransformError::syntax(format!("bad number '{text}'")))?;
                toks.push(Tok::Num(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '-' | '?'))
                {
                    i += 1;
                }
                toks.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(TransformError::syntax(format!(
                    "unexpected '{other}' in '{src}'"
                )))
            }
        }
    }
    Ok(toks)
}

struct ExprParser {
    toks: Vec<Tok>,
    pos: usize,
    source: String,
}

impl ExprParser {
    fn new(src: &str) -> TransformResult<Self> {
        Ok(Self {
            toks: lex(src)?,
            pos: 0,
            source: src.to_string(),
        })
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, what: &str) -> TransformError {
        TransformError::syntax(format!("{what} in '{}'", self.source))
    }

    fn finish(&self) -> TransformResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(self.error(&format!("unexpected {tok:?}"))),
        }
    }

    fn expression(&mut self) -> TransformResult<Expression> {
        let operand = self.operand()?;
        let mut filters = Vec::new();
        while self.eat(&Tok::Pipe) {
            let name = match self.bump() {
                Some(Tok::Ident(name)) => name,
                _ => return Err(self.error("expected filter name")),
            };
            let mut args = Vec::new();
            if self.eat(&Tok::Colon) {
                args.push(self.operand()?);
                while self.eat(&Tok::Comma) {
                    args.push(self.operand()?);
                }
            }
            filters.push(FilterCall { name, args });
        }
        Ok(Expression { operand, filters })
    }

    fn operand(&mut self) -> TransformResult<Operand> {
        match self.bump() {
            Some(Tok::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(Tok::Num(n)) => Ok(Operand::Literal(n)),
            Some(Tok::Ident(name)) => {
                let bare = !matches!(self.peek(), Some(Tok::Dot | Tok::LBracket));
                if bare {
                    match name.as_str() {
                        "true" => return Ok(Operand::Literal(Value::Bool(true))),
                        "false" => return Ok(Operand::Literal(Value::Bool(false))),
                        "nil" | "null" => return Ok(Operand::Literal(Value::Null)),
                        "empty" => return Ok(Operand::Empty),
                        "blank" => return Ok(Operand::Blank),
                        _ => {}
                    }
                }
                self.path(name)
            }
            Some(Tok::LBracket) => {
                // `["key with spaces"]` at top level
                let first = self.bracket_segment()?;
                let mut segments = vec![first];
                self.path_tail(&mut segments)?;
                Ok(Operand::Variable(segments))
            }
            _ => Err(self.error("expected a value")),
        }
    }

    fn path(&mut self, head: String) -> TransformResult<Operand> {
        let mut segments = vec![Segment::Key(head)];
        self.path_tail(&mut segments)?;
        Ok(Operand::Variable(segments))
    }

    fn path_tail(&mut self, segments: &mut Vec<Segment>) -> TransformResult<()> {
        loop {
            if self.eat(&Tok::Dot) {
                match self.bump() {
                    Some(Tok::Ident(key)) => segments.push(Segment::Key(key)),
                    _ => return Err(self.error("expected a property name after '.'")),
                }
            } else if self.eat(&Tok::LBracket) {
                let segment = self.bracket_segment()?;
                segments.push(segment);
            } else {
                return Ok(());
            }
        }
    }

    /// Contents of `[...]`; the opening bracket is already consumed
    fn bracket_segment(&mut self) -> TransformResult<Segment> {
        let segment = match self.operand()? {
            Operand::Literal(Value::String(key)) => Segment::Key(key),
            Operand::Literal(Value::Number(n)) => match n.as_i64() {
                Some(i) => Segment::Index(i),
                None => return Err(self.error("array index must be an integer")),
            },
            op @ Operand::Variable(_) => Segment::Lookup(Box::new(op)),
            _ => return Err(self.error("invalid index")),
        };
        if !self.eat(&Tok::RBracket) {
            return Err(self.error("expected ']'"));
        }
        Ok(segment)
    }

    fn comparison(&mut self) -> TransformResult<Condition> {
        let left = self.operand()?;
        let op = match self.peek() {
            Some(Tok::Op(op)) => Some(*op),
            Some(Tok::Ident(word)) if word == "contains" => Some(CompareOp::Contains),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let right = self.operand()?;
                Ok(Condition::Compare(left, op, right))
            }
            None => Ok(Condition::Test(left)),
        }
    }

    /// `a and b or c`, combined right to left
    fn condition(&mut self) -> TransformResult<Condition> {
        let mut terms = vec![self.comparison()?];
        let mut joins = Vec::new();
        while let Some(Tok::Ident(word)) = self.peek() {
            let is_and = match word.as_str() {
                "and" => true,
                "or" => false,
                _ => break,
            };
            self.pos += 1;
            joins.push(is_and);
            terms.push(self.comparison()?);
        }

        let mut result = terms.pop().ok_or_else(|| self.error("empty condition"))?;
        while let (Some(left), Some(is_and)) = (terms.pop(), joins.pop()) {
            result = if is_and {
                Condition::And(Box::new(left), Box::new(result))
            } else {
                Condition::Or(Box::new(left), Box::new(result))
            };
        }
        Ok(result)
    }
}

fn parse_expression(src: &str) -> TransformResult<Expression> {
    if src.is_empty() {
        return Ok(Expression {
            operand: Operand::Literal(Value::Null),
            filters: Vec::new(),
        });
    }
    let mut parser = ExprParser::new(src)?;
    let expr = parser.expression()?;
    parser.finish()?;
    Ok(expr)
}

fn parse_condition(src: &str) -> TransformResult<Condition> {
    let mut parser = ExprParser::new(src)?;
    let condition = parser.condition()?;
    parser.finish()?;
    Ok(condition)
}

fn parse_assign(src: &str) -> TransformResult<Node> {
    let mut parser = ExprParser::new(src)?;
    let name = match parser.bump() {
        Some(Tok::Ident(name)) => name,
        _ => return Err(parser.error("expected a variable name")),
    };
    if !parser.eat(&Tok::Assign) {
        return Err(parser.error("expected '='"));
    }
    let value = parser.expression()?;
    parser.finish()?;
    Ok(Node::Assign { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn var(path: &[&str]) -> Operand {
        Operand::Variable(path.iter().map(|k| Segment::Key(k.to_string())).collect())
    }

    #[test]
    fn test_scan_text_and_output() {
        let nodes = parse("Hello {{ name }}!").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("Hello ".into()),
                Node::Output(Expression {
                    operand: var(&["name"]),
                    filters: vec![]
                }),
                Node::Text("!".into()),
            ]
        );
    }

    #[test]
    fn test_filters_with_args() {
        let nodes = parse("{{cr_reason_sk  | regex_replace: '[0-9]+', 'Numbers'}}").unwrap();
        let Node::Output(expr) = &nodes[0] else {
            panic!("expected output");
        };
        assert_eq!(expr.operand, var(&["cr_reason_sk"]));
        assert_eq!(expr.filters[0].name, "regex_replace");
        assert_eq!(
            expr.filters[0].args,
            vec![
                Operand::Literal(json!("[0-9]+")),
                Operand::Literal(json!("Numbers"))
            ]
        );
    }

    #[test]
    fn test_paths() {
        let nodes = parse(r#"{{ user.tags[0] }}{{ user["first name"] }}{{ a[b] }}"#).unwrap();
        let Node::Output(first) = &nodes[0] else {
            panic!()
        };
        assert_eq!(
            first.operand,
            Operand::Variable(vec![
                Segment::Key("user".into()),
                Segment::Key("tags".into()),
                Segment::Index(0)
            ])
        );
        let Node::Output(third) = &nodes[2] else {
            panic!()
        };
        assert_eq!(
            third.operand,
            Operand::Variable(vec![
                Segment::Key("a".into()),
                Segment::Lookup(Box::new(var(&["b"])))
            ])
        );
    }

    #[test]
    fn test_whitespace_control() {
        let nodes = parse("a  {{- x -}}  b").unwrap();
        assert_eq!(nodes[0], Node::Text("a".into()));
        assert_eq!(nodes[2], Node::Text("b".into()));
    }

    #[test]
    fn test_if_elsif_else() {
        let nodes = parse("{% if a == 1 %}one{% elsif a > 1 and b %}many{% else %}none{% endif %}")
            .unwrap();
        let Node::If {
            branches,
            otherwise,
        } = &nodes[0]
        else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert!(matches!(branches[1].0, Condition::And(_, _)));
        assert_eq!(otherwise, &vec![Node::Text("none".into())]);
    }

    #[test]
    fn test_conditions_fold_right() {
        let cond = parse_condition("a or b and c").unwrap();
        let Condition::Or(left, right) = cond else {
            panic!("expected or at the root");
        };
        assert_eq!(*left, Condition::Test(var(&["a"])));
        assert!(matches!(*right, Condition::And(_, _)));
    }

    #[test]
    fn test_raw_and_comment() {
        let nodes = parse("{% raw %}{{ keep }}{% endraw %}{% comment %}drop{% endcomment %}x")
            .unwrap();
        assert_eq!(
            nodes,
            vec![Node::Text("{{ keep }}".into()), Node::Text("x".into())]
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("{{ name ").is_err());
        assert!(parse("{% if a %}x").is_err());
        assert!(parse("{% for x in xs %}{% endfor %}").is_err());
        assert!(parse("{{ 'open }}").is_err());
        assert!(parse("{{ a | }}").is_err());
    }

    #[test]
    fn test_literals() {
        let nodes = parse("{{ -3 }}{{ 2.5 }}{{ nil }}{{ true }}").unwrap();
        let ops: Vec<_> = nodes
            .iter()
            .map(|n| match n {
                Node::Output(e) => e.operand.clone(),
                _ => panic!(),
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                Operand::Literal(json!(-3)),
                Operand::Literal(json!(2.5)),
                Operand::Literal(Value::Null),
                Operand::Literal(json!(true)),
            ]
        );
    }
}
