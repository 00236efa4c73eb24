//! 条件编译器
//!
//! 将条件字符串词法分析并解析为语法树，规则加载时编译一次，评估时直接遍历语法树。
//!
//! 优先级（由弱到强）：`or` < `and` < `not` < 比较 < 括号/操作数。

use crate::error::{Result, RuleError};
use crate::models::Rule;
use crate::operators::{CompareOp, LogicalOperator};
use serde_json::{Number, Value};

/// 条件语法树
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// 空条件，恒为真
    Always,
    Logical {
        op: LogicalOperator,
        children: Vec<Expr>,
    },
    Not(Box<Expr>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    /// 无比较操作符时直接取操作数的真值
    Truthy(Operand),
}

/// 比较操作数
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    /// 点号分隔的上下文路径
    Path(String),
    Group(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    LParen,
    RParen,
    Compare(CompareOp),
    Logical(LogicalOperator),
    Not,
    Str(String),
    Atom(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

fn is_atom_char(c: char) -> bool {
    !(c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"' | '<' | '>' | '=' | '!'))
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let kind = match c {
            '(' => {
                chars.next();
                TokenKind::LParen
            }
            ')' => {
                chars.next();
                TokenKind::RParen
            }
            '\'' | '"' => {
                chars.next();
                let start = pos + c.len_utf8();
                let end = loop {
                    match chars.next() {
                        Some((i, ch)) if ch == c => break i,
                        Some(_) => {}
                        None => return Err(RuleError::condition(pos, "字符串字面量未闭合")),
                    }
                };
                TokenKind::Str(input[start..end].to_string())
            }
            '<' | '>' | '=' | '!' => {
                let op = CompareOp::match_prefix(&input[pos..]).ok_or_else(|| {
                    RuleError::condition(pos, format!("无法识别的操作符 '{}'", c))
                })?;
                for _ in 0..op.symbol().len() {
                    chars.next();
                }
                TokenKind::Compare(op)
            }
            _ => {
                let mut end = pos;
                while let Some(&(i, ch)) = chars.peek() {
                    if !is_atom_char(ch) {
                        break;
                    }
                    end = i + ch.len_utf8();
                    chars.next();
                }
                let word = &input[pos..end];
                if let Some(op) = LogicalOperator::from_keyword(word) {
                    TokenKind::Logical(op)
                } else if word == "not" {
                    TokenKind::Not
                } else {
                    TokenKind::Atom(word.to_string())
                }
            }
        };

        tokens.push(Token { kind, pos });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.cursor).map(|t| &t.kind)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.cursor).map_or(self.end, |t| t.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn parse_logical<F>(&mut self, op: LogicalOperator, mut next: F) -> Result<Expr>
    where
        F: FnMut(&mut Self) -> Result<Expr>,
    {
        let mut children = vec![next(self)?];
        while self.peek() == Some(&TokenKind::Logical(op)) {
            self.advance();
            children.push(next(self)?);
        }

        if children.len() == 1 {
            Ok(children.remove(0))
        } else {
            Ok(Expr::Logical { op, children })
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        self.parse_logical(LogicalOperator::Or, Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        self.parse_logical(LogicalOperator::And, Self::parse_not)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.peek() == Some(&TokenKind::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_comparison()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_operand()?;

        if let Some(&TokenKind::Compare(op)) = self.peek() {
            self.advance();
            let right = self.parse_operand()?;
            return Ok(Expr::Compare { left, op, right });
        }

        Ok(match left {
            Operand::Group(inner) => *inner,
            other => Expr::Truthy(other),
        })
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        let pos = self.position();
        match self.advance().map(|t| t.kind) {
            Some(TokenKind::LParen) => {
                let inner = self.parse_or()?;
                match self.advance().map(|t| t.kind) {
                    Some(TokenKind::RParen) => Ok(Operand::Group(Box::new(inner))),
                    _ => Err(RuleError::condition(pos, "括号未闭合")),
                }
            }
            Some(TokenKind::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(TokenKind::Atom(word)) => Ok(resolve_atom(word)),
            Some(other) => Err(RuleError::condition(
                pos,
                format!("期望操作数，实际为 {:?}", other),
            )),
            None => Err(RuleError::condition(pos, "表达式意外结束")),
        }
    }
}

/// 解析裸 token：布尔/空值字面量、整数、浮点数，否则视为上下文路径
fn resolve_atom(word: String) -> Operand {
    match word.as_str() {
        "true" => return Operand::Literal(Value::Bool(true)),
        "false" => return Operand::Literal(Value::Bool(false)),
        "null" => return Operand::Literal(Value::Null),
        _ => {}
    }

    if let Ok(i) = word.parse::<i64>() {
        return Operand::Literal(Value::from(i));
    }

    // 仅数字形态的 token 才尝试浮点解析，避免把 inf/nan 之类的字段名当成数字
    let numeric_start = word
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
    if numeric_start {
        if let Some(n) = word.parse::<f64>().ok().and_then(Number::from_f64) {
            return Operand::Literal(Value::Number(n));
        }
    }

    Operand::Path(word)
}

/// 编译条件字符串
pub fn compile_condition(condition: &str) -> Result<Expr> {
    let tokens = tokenize(condition)?;
    if tokens.is_empty() {
        return Ok(Expr::Always);
    }

    let mut parser = Parser {
        tokens,
        cursor: 0,
        end: condition.len(),
    };
    let expr = parser.parse_or()?;

    if parser.cursor < parser.tokens.len() {
        return Err(RuleError::condition(
            parser.position(),
            "条件末尾存在无法解析的内容",
        ));
    }

    Ok(expr)
}

/// 编译后的规则
///
/// 条件编译失败不会阻止文档加载，错误在评估时记录到该规则的执行记录中。
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub rule: Rule,
    pub condition: std::result::Result<Expr, String>,
}

impl CompiledRule {
    pub fn compile(rule: Rule) -> Self {
        let condition = compile_condition(&rule.condition).map_err(|e| e.to_string());
        Self { rule, condition }
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    pub fn name(&self) -> &str {
        self.rule.display_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> Operand {
        Operand::Path(p.to_string())
    }

    fn lit(v: Value) -> Operand {
        Operand::Literal(v)
    }

    #[test]
    fn test_empty_condition_is_always() {
        assert_eq!(compile_condition("").unwrap(), Expr::Always);
        assert_eq!(compile_condition("   ").unwrap(), Expr::Always);
    }

    #[test]
    fn test_simple_comparison() {
        assert_eq!(
            compile_condition("age > 60").unwrap(),
            Expr::Compare {
                left: path("age"),
                op: CompareOp::Gt,
                right: lit(json!(60)),
            }
        );
    }

    #[test]
    fn test_operators_without_spaces() {
        assert_eq!(
            compile_condition("score>=700").unwrap(),
            Expr::Compare {
                left: path("score"),
                op: CompareOp::Gte,
                right: lit(json!(700)),
            }
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = compile_condition("a == 1 or b == 2 and c == 3").unwrap();
        let Expr::Logical { op, children } = expr else {
            panic!("expected logical group");
        };
        assert_eq!(op, LogicalOperator::Or);
        assert_eq!(children.len(), 2);
        assert!(matches!(
            children[1],
            Expr::Logical {
                op: LogicalOperator::And,
                ..
            }
        ));
    }

    #[test]
    fn test_keywords_inside_strings_are_data() {
        assert_eq!(
            compile_condition("note == 'rock and roll or not'").unwrap(),
            Expr::Compare {
                left: path("note"),
                op: CompareOp::Eq,
                right: lit(json!("rock and roll or not")),
            }
        );
    }

    #[test]
    fn test_operator_inside_string_is_data() {
        assert_eq!(
            compile_condition("label == \">= 5\"").unwrap(),
            Expr::Compare {
                left: path("label"),
                op: CompareOp::Eq,
                right: lit(json!(">= 5")),
            }
        );
    }

    #[test]
    fn test_parenthesized_whole_expression() {
        let grouped = compile_condition("(a == 1 or b == 2)").unwrap();
        let plain = compile_condition("a == 1 or b == 2").unwrap();
        assert_eq!(grouped, plain);
    }

    #[test]
    fn test_not_and_bare_field() {
        assert_eq!(
            compile_condition("not smoker").unwrap(),
            Expr::Not(Box::new(Expr::Truthy(path("smoker"))))
        );
    }

    #[test]
    fn test_keywords_case_insensitive() {
        let expr = compile_condition("a == 1 AND b == 2").unwrap();
        assert!(matches!(
            expr,
            Expr::Logical {
                op: LogicalOperator::And,
                ..
            }
        ));
    }

    #[test]
    fn test_literals() {
        assert_eq!(resolve_atom("true".into()), lit(json!(true)));
        assert_eq!(resolve_atom("null".into()), lit(Value::Null));
        assert_eq!(resolve_atom("-3".into()), lit(json!(-3)));
        assert_eq!(resolve_atom("0.25".into()), lit(json!(0.25)));
        assert_eq!(resolve_atom("inf".into()), path("inf"));
        assert_eq!(resolve_atom("user.tier".into()), path("user.tier"));
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "age >",
            "(age > 1",
            "()",
            "age = 5",
            "name == 'open",
            "a == 1 b",
            "and",
        ] {
            let err = compile_condition(bad).unwrap_err();
            assert!(
                matches!(err, RuleError::Condition { .. }),
                "expected condition error for {bad:?}"
            );
        }
    }

    #[test]
    fn test_error_position() {
        match compile_condition("age > 1 )").unwrap_err() {
            RuleError::Condition { position, .. } => assert_eq!(position, Some(8)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_compiled_rule_keeps_error() {
        let rule: Rule = serde_json::from_value(json!({"id": "r1", "condition": "x >"})).unwrap();
        let compiled = CompiledRule::compile(rule);
        assert_eq!(compiled.id(), "r1");
        assert!(compiled.condition.is_err());
    }
}
