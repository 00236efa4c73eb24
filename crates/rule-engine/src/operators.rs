//! 条件语言操作符定义

use std::fmt;

/// 比较操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Gte,
    Lte,
    Neq,
    Eq,
    Gt,
    Lt,
}

impl CompareOp {
    /// 词法匹配顺序：双字符操作符必须先于其单字符前缀
    pub const MATCH_ORDER: [CompareOp; 6] = [
        Self::Gte,
        Self::Lte,
        Self::Neq,
        Self::Eq,
        Self::Gt,
        Self::Lt,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Neq => "!=",
            Self::Eq => "==",
            Self::Gt => ">",
            Self::Lt => "<",
        }
    }

    /// 在输入开头匹配一个比较操作符
    pub fn match_prefix(input: &str) -> Option<CompareOp> {
        Self::MATCH_ORDER
            .into_iter()
            .find(|op| input.starts_with(op.symbol()))
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// 逻辑操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    /// 关键字匹配不区分大小写
    pub fn from_keyword(word: &str) -> Option<Self> {
        if word.eq_ignore_ascii_case("and") {
            Some(Self::And)
        } else if word.eq_ignore_ascii_case("or") {
            Some(Self::Or)
        } else {
            None
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
        }
    }
}
