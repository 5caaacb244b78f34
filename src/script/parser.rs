//! Parser
//!
//! Recursive-descent parser producing the [`Program`] AST. Unsupported syntax is
//! reported as a `SyntaxError` carrying the offending line.

use super::ast::*;
use super::error::{ScriptError, ScriptResult};
use super::lexer::{tokenize, Tok, Token};

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

/// Deepest nesting of expressions and blocks accepted
const MAX_NESTING: usize = 100;

/// Parse a whole script
pub fn parse(source: &str) -> ScriptResult<Program> {
    let tokens = tokenize(source)?;
    Parser::new(tokens, 0).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Added to token lines (used for f-string fragments)
    line_offset: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, line_offset: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line_offset,
            depth: 0,
        }
    }

    /* ===================== Token helpers ===================== */

    fn peek(&self) -> &Tok {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Tok {
        let idx = (self.pos + n).min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx].tok
    }

    fn line(&self) -> usize {
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        self.tokens.get(idx).map(|t| t.line).unwrap_or(1) + self.line_offset
    }

    fn span(&self) -> Span {
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        let column = self.tokens.get(idx).map(|t| t.column).unwrap_or(1);
        Span::new(self.line(), column)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message, self.line())
    }

    fn unexpected(&self) -> ScriptError {
        let found = match self.peek() {
            Tok::Name(n) => format!("'{}'", n),
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) | Tok::FStr(_) => "string literal".to_string(),
            Tok::Op(op) => format!("'{}'", op),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "unexpected indent".to_string(),
            Tok::Dedent => "unexpected dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax near {}", found))
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> ScriptResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> ScriptResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> ScriptResult<String> {
        match self.peek().clone() {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn expect_dotted_name(&mut self) -> ScriptResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.is_op(";")
    }

    fn expect_line_end(&mut self) -> ScriptResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    /* ===================== Statements ===================== */

    fn parse_program(mut self) -> ScriptResult<Program> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                Tok::Indent => return Err(self.error("unexpected indent")),
                _ => body.extend(self.parse_statement()?),
            }
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> ScriptResult<Vec<Stmt>> {
        let keyword = match self.peek() {
            Tok::Name(n) => n.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "if" => Ok(vec![self.parse_if()?]),
            "for" => Ok(vec![self.parse_for()?]),
            "while" => Ok(vec![self.parse_while()?]),
            "def" => Ok(vec![self.parse_def()?]),
            "try" => Ok(vec![self.parse_try()?]),
            "class" | "with" | "async" | "global" | "nonlocal" | "del" | "assert"
            | "yield" | "await" => Err(self.error(format!("'{}' is not supported", keyword))),
            _ => self.parse_simple_line(),
        }
    }

    fn parse_simple_line(&mut self) -> ScriptResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            stmts.extend(self.parse_simple()?);
            if self.eat_op(";") {
                if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        self.expect_line_end()?;
        Ok(stmts)
    }

    fn parse_simple(&mut self) -> ScriptResult<Vec<Stmt>> {
        let span = self.span();
        let stmt = |kind| Stmt { kind, span };

        if self.eat_keyword("pass") {
            return Ok(vec![stmt(StmtKind::Pass)]);
        }
        if self.eat_keyword("break") {
            return Ok(vec![stmt(StmtKind::Break)]);
        }
        if self.eat_keyword("continue") {
            return Ok(vec![stmt(StmtKind::Continue)]);
        }
        if self.eat_keyword("return") {
            let value = if self.at_line_end() {
                None
            } else {
                Some(self.parse_testlist()?)
            };
            return Ok(vec![stmt(StmtKind::Return(value))]);
        }
        if self.eat_keyword("raise") {
            let value = if self.at_line_end() {
                None
            } else {
                Some(self.parse_expr()?)
            };
            return Ok(vec![stmt(StmtKind::Raise(value))]);
        }
        if self.eat_keyword("import") {
            let mut stmts = Vec::new();
            loop {
                let module = self.expect_dotted_name()?;
                let alias = if self.eat_keyword("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                stmts.push(stmt(StmtKind::Import { module, alias }));
                if !self.eat_op(",") {
                    break;
                }
            }
            return Ok(stmts);
        }
        if self.eat_keyword("from") {
            let module = self.expect_dotted_name()?;
            self.expect_keyword("import")?;
            let parenthesized = self.eat_op("(");
            let mut names = Vec::new();
            loop {
                if self.is_op("*") {
                    return Err(self.error("wildcard imports are not supported"));
                }
                let name = self.expect_name()?;
                let alias = if self.eat_keyword("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                names.push((name, alias));
                if !self.eat_op(",") || (parenthesized && self.is_op(")")) {
                    break;
                }
            }
            if parenthesized {
                self.expect_op(")")?;
            }
            return Ok(vec![stmt(StmtKind::FromImport { module, names })]);
        }

        let first = self.parse_testlist()?;

        for (symbol, op) in [
            ("+=", BinOp::Add),
            ("-=", BinOp::Sub),
            ("*=", BinOp::Mul),
            ("/=", BinOp::Div),
            ("//=", BinOp::FloorDiv),
            ("%=", BinOp::Mod),
            ("**=", BinOp::Pow),
        ] {
            if self.eat_op(symbol) {
                let target = self.to_target(first)?;
                let value = self.parse_testlist()?;
                return Ok(vec![stmt(StmtKind::AugAssign { target, op, value })]);
            }
        }

        if self.is_op("=") {
            let mut targets = vec![self.to_target(first)?];
            let value = loop {
                self.expect_op("=")?;
                let next = self.parse_testlist()?;
                if self.is_op("=") {
                    targets.push(self.to_target(next)?);
                } else {
                    break next;
                }
            };
            return Ok(vec![stmt(StmtKind::Assign { targets, value })]);
        }

        if self.is_op(":") {
            return Err(self.error("annotated assignments are not supported"));
        }

        Ok(vec![stmt(StmtKind::Expr(first))])
    }

    fn to_target(&self, expr: Expr) -> ScriptResult<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Subscript { object, key } => Ok(Target::Subscript { object, key }),
            Expr::Attribute { object, name } => Ok(Target::Attribute { object, name }),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|item| self.to_target(item))
                    .collect::<ScriptResult<Vec<_>>>()?,
            )),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ScriptResult<T>) -> ScriptResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("too many nested expressions or blocks"));
        }
        self.depth += 1;
        let out = parse(self);
        self.depth -= 1;
        out
    }

    fn parse_block(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.nested(Self::parse_block_body)
    }

    fn parse_block_body(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            return self.parse_simple_line();
        }
        self.advance();
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.advance();

        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.advance();
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                _ => body.extend(self.parse_statement()?),
            }
        }
        Ok(body)
    }

    fn parse_if(&mut self) -> ScriptResult<Stmt> {
        let span = self.span();
        self.expect_keyword("if")?;
        let mut branches = Vec::new();
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        branches.push((test, body));

        let mut orelse = Vec::new();
        loop {
            if self.eat_keyword("elif") {
                let test = self.parse_expr()?;
                let body = self.parse_block()?;
                branches.push((test, body));
            } else if self.eat_keyword("else") {
                orelse = self.parse_block()?;
                break;
            } else {
                break;
            }
        }

        Ok(Stmt {
            kind: StmtKind::If { branches, orelse },
            span,
        })
    }

    fn parse_for(&mut self) -> ScriptResult<Stmt> {
        let span = self.span();
        self.expect_keyword("for")?;
        let target = self.parse_loop_target()?;
        self.expect_keyword("in")?;
        let iter = self.parse_testlist()?;
        let body = self.parse_block()?;
        if self.is_keyword("else") {
            return Err(self.error("'for ... else' is not supported"));
        }
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            span,
        })
    }

    fn parse_loop_target(&mut self) -> ScriptResult<Target> {
        let mut items = vec![self.parse_bitor()?];
        while self.eat_op(",") {
            if self.is_keyword("in") {
                break;
            }
            items.push(self.parse_bitor()?);
        }
        if items.len() == 1 {
            let item = items.remove(0);
            self.to_target(item)
        } else {
            self.to_target(Expr::Tuple(items))
        }
    }

    fn parse_while(&mut self) -> ScriptResult<Stmt> {
        let span = self.span();
        self.expect_keyword("while")?;
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::While { test, body },
            span,
        })
    }

    fn parse_def(&mut self) -> ScriptResult<Stmt> {
        let span = self.span();
        self.expect_keyword("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let mut params = Vec::new();
        while !self.is_op(")") {
            if self.is_op("*") || self.is_op("**") {
                return Err(self.error("variadic parameters are not supported"));
            }
            let param = self.expect_name()?;
            if self.eat_op(":") {
                self.parse_expr()?;
            }
            let default = if self.eat_op("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.parse_expr()?;
        }
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef { name, params, body },
            span,
        })
    }

    fn parse_try(&mut self) -> ScriptResult<Stmt> {
        let span = self.span();
        self.expect_keyword("try")?;
        let body = self.parse_block()?;

        let mut handlers = Vec::new();
        while self.eat_keyword("except") {
            let fault = if self.is_op(":") {
                None
            } else if self.is_op("(") {
                return Err(self.error("catching multiple exception types is not supported"));
            } else {
                Some(self.expect_dotted_name()?)
            };
            let alias = if self.eat_keyword("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            let body = self.parse_block()?;
            handlers.push(ExceptHandler { fault, alias, body });
        }
        if self.is_keyword("else") {
            return Err(self.error("'try ... else' is not supported"));
        }
        let finally = if self.eat_keyword("finally") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                handlers,
                finally,
            },
            span,
        })
    }

    /* ===================== Expressions ===================== */

    /// Comma-separated expressions; more than one becomes a tuple
    fn parse_testlist(&mut self) -> ScriptResult<Expr> {
        let first = self.parse_expr()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_line_end() || self.is_op("=") || self.is_op(")") || self.is_op(":") {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_expr(&mut self) -> ScriptResult<Expr> {
        self.nested(Self::parse_expr_body)
    }

    fn parse_expr_body(&mut self) -> ScriptResult<Expr> {
        if self.eat_keyword("lambda") {
            return self.parse_lambda();
        }
        let body = self.parse_or()?;
        if self.eat_keyword("if") {
            let test = self.parse_or()?;
            self.expect_keyword("else")?;
            let orelse = self.parse_expr()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> ScriptResult<Expr> {
        let mut params = Vec::new();
        while !self.is_op(":") {
            let name = self.expect_name()?;
            let default = if self.eat_op("=") {
                Some(self.parse_or()?)
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(":")?;
        let body = self.parse_expr()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn parse_or(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::BoolOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::BoolOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ScriptResult<Expr> {
        if self.eat_keyword("not") {
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ScriptResult<Expr> {
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_nth(1), Tok::Name(m) if m == "in") => {
                    self.advance();
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_nth(1), Tok::Name(m) if m == "not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            let right = self.parse_bitor()?;
            ops.push((op, right));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
            })
        }
    }

    fn parse_bitor(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_bitand()?;
        while self.eat_op("|") {
            let right = self.parse_bitand()?;
            left = binary(BinOp::BitOr, left, right);
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_arith()?;
        while self.eat_op("&") {
            let right = self.parse_arith()?;
            left = binary(BinOp::BitAnd, left, right);
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> ScriptResult<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.parse_factor()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> ScriptResult<Expr> {
        let op = if self.eat_op("-") {
            UnaryOp::Neg
        } else if self.eat_op("+") {
            UnaryOp::Pos
        } else if self.eat_op("~") {
            UnaryOp::Invert
        } else {
            return self.parse_power();
        };
        let operand = self.nested(Self::parse_factor)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> ScriptResult<Expr> {
        let base = self.parse_primary()?;
        if self.eat_op("**") {
            let exponent = self.parse_factor()?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            if self.eat_op("(") {
                let (args, kwargs) = self.parse_call_args()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                let key = self.parse_subscript_key()?;
                self.expect_op("]")?;
                expr = Expr::Subscript {
                    object: Box::new(expr),
                    key: Box::new(key),
                };
            } else if self.eat_op(".") {
                let name = match self.advance() {
                    Tok::Name(n) => n,
                    _ => return Err(self.error("expected attribute name after '.'")),
                };
                expr = Expr::Attribute {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> ScriptResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.is_op(")") {
            if self.is_op("*") || self.is_op("**") {
                return Err(self.error("argument unpacking is not supported"));
            }
            let is_keyword_arg = matches!(self.peek(), Tok::Name(_))
                && matches!(self.peek_nth(1), Tok::Op("="));
            if is_keyword_arg {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                let value = self.parse_expr()?;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let value = self.parse_expr()?;
                if self.is_keyword("for") {
                    args.push(self.parse_comprehension(value)?);
                } else {
                    args.push(value);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn parse_subscript_key(&mut self) -> ScriptResult<Expr> {
        let first = self.parse_slice_item()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op("]") {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn parse_slice_item(&mut self) -> ScriptResult<Expr> {
        let lower = if self.is_op(":") {
            None
        } else {
            let expr = self.parse_expr()?;
            if !self.is_op(":") {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(":")?;
        let bound_ends = |p: &Self| p.is_op("]") || p.is_op(",") || p.is_op(":");
        let upper = if bound_ends(self) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let step = if self.eat_op(":") {
            if bound_ends(self) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn parse_comprehension(&mut self, element: Expr) -> ScriptResult<Expr> {
        self.expect_keyword("for")?;
        let target = self.parse_loop_target()?;
        self.expect_keyword("in")?;
        let iter = self.parse_or()?;
        let condition = if self.eat_keyword("if") {
            Some(Box::new(self.parse_or()?))
        } else {
            None
        };
        if self.is_keyword("for") || self.is_keyword("if") {
            return Err(self.error("nested comprehensions are not supported"));
        }
        Ok(Expr::ListComp {
            element: Box::new(element),
            target,
            iter: Box::new(iter),
            condition,
        })
    }

    fn parse_atom(&mut self) -> ScriptResult<Expr> {
        match self.peek().clone() {
            Tok::Int(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            Tok::Float(v) => {
                self.advance();
                Ok(Expr::Float(v))
            }
            Tok::Str(_) | Tok::FStr(_) => self.parse_strings(),
            Tok::Name(name) => match name.as_str() {
                "None" => {
                    self.advance();
                    Ok(Expr::None)
                }
                "True" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "False" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                kw if KEYWORDS.contains(&kw) => Err(self.unexpected()),
                _ => {
                    self.advance();
                    Ok(Expr::Name(name))
                }
            },
            Tok::Op("(") => {
                self.advance();
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.is_keyword("for") {
                    let comp = self.parse_comprehension(first)?;
                    self.expect_op(")")?;
                    return Ok(comp);
                }
                if !self.is_op(",") {
                    self.expect_op(")")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op(")") {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                self.advance();
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_expr()?;
                if self.is_keyword("for") {
                    let comp = self.parse_comprehension(first)?;
                    self.expect_op("]")?;
                    return Ok(comp);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op("]") {
                        break;
                    }
                    items.push(self.parse_expr()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.advance();
                let mut entries = Vec::new();
                while !self.is_op("}") {
                    let key = self.parse_expr()?;
                    if !self.eat_op(":") {
                        return Err(self.error("set literals are not supported"));
                    }
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(entries))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Adjacent literals concatenate; any f-string makes the whole run formatted
    fn parse_strings(&mut self) -> ScriptResult<Expr> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        let line = self.line();
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    parts.push(FStringPart::Literal(s));
                }
                Tok::FStr(body) => {
                    self.advance();
                    formatted = true;
                    parts.extend(parse_fstring(&body, line)?);
                }
                _ => break,
            }
        }

        if !formatted {
            let text = parts
                .into_iter()
                .map(|p| match p {
                    FStringPart::Literal(s) => s,
                    FStringPart::Expr { .. } => String::new(),
                })
                .collect::<String>();
            return Ok(Expr::Str(text));
        }
        Ok(Expr::FString(parts))
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Split an f-string body into literal and `{expr[:spec]}` parts
fn parse_fstring(body: &str, line: usize) -> ScriptResult<Vec<FStringPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            literal.push('}');
            i += 2;
            continue;
        }
        if c == '}' {
            return Err(ScriptError::syntax("f-string: single '}' is not allowed", line));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        // find the matching close brace, skipping nested brackets and quotes
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut spec_at: Option<usize> = None;
        let mut j = i + 1;
        while j < chars.len() {
            let d = chars[j];
            match quote {
                Some(q) => {
                    if d == q {
                        quote = None;
                    }
                }
                None => match d {
                    '\'' | '"' => quote = Some(d),
                    '[' | '(' | '{' => depth += 1,
                    ']' | ')' => depth = depth.saturating_sub(1),
                    '}' if depth > 0 => depth -= 1,
                    '}' => break,
                    ':' if depth == 0 && spec_at.is_none() => spec_at = Some(j),
                    _ => {}
                },
            }
            j += 1;
        }
        if j >= chars.len() {
            return Err(ScriptError::syntax("f-string: expecting '}'", line));
        }

        let expr_end = spec_at.unwrap_or(j);
        let mut expr_text: String = chars[i + 1..expr_end].iter().collect();
        for conversion in ["!r", "!s", "!a"] {
            if expr_text.trim_end().ends_with(conversion) {
                let trimmed = expr_text.trim_end();
                expr_text = trimmed[..trimmed.len() - conversion.len()].to_string();
            }
        }
        let spec = spec_at.map(|s| chars[s + 1..j].iter().collect::<String>());

        if expr_text.trim().is_empty() {
            return Err(ScriptError::syntax("f-string: empty expression not allowed", line));
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
        }
        let tokens = tokenize(expr_text.trim()).map_err(|e| ScriptError::syntax(e.message, line))?;
        let mut parser = Parser::new(tokens, line.saturating_sub(1));
        let expr = parser.parse_expr()?;
        if !matches!(parser.peek(), Tok::Newline | Tok::Eof) {
            return Err(ScriptError::syntax("f-string: invalid expression", line));
        }
        parts.push(FStringPart::Expr { expr, spec });
        i = j + 1;
    }

    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_kind(source: &str) -> StmtKind {
        parse(source).unwrap().body.remove(0).kind
    }

    #[test]
    fn test_parse_groupby_chain() {
        let kind = first_kind("result = df.groupby('region')['sales'].sum()\n");
        match kind {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(&targets[0], Target::Name(n) if n == "result"));
                assert!(matches!(value, Expr::Call { .. }));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_parse_keyword_arguments() {
        let kind = first_kind("df.sort_values(by=['a', 'b'], ascending=False)");
        match kind {
            StmtKind::Expr(Expr::Call { args, kwargs, .. }) => {
                assert!(args.is_empty());
                assert_eq!(kwargs.len(), 2);
                assert_eq!(kwargs[0].0, "by");
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_parse_blocks_and_line_numbers() {
        let program = parse("total = 0\nfor x in [1, 2]:\n    if x > 1:\n        total += x\n    else:\n        pass\n").unwrap();
        assert_eq!(program.body.len(), 2);
        assert_eq!(program.body[1].span.line, 2);
        match &program.body[1].kind {
            StmtKind::For { body, .. } => assert!(matches!(body[0].kind, StmtKind::If { .. })),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_parse_mask_precedence() {
        let kind = first_kind("m = (df['a'] > 1) & (df['b'] < 2)");
        match kind {
            StmtKind::Assign { value, .. } => {
                assert!(matches!(value, Expr::Binary { op: BinOp::BitAnd, .. }))
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_parse_fstring_parts() {
        let kind = first_kind("msg = f'Total: {total:,.2f} in {region!r}'");
        match kind {
            StmtKind::Assign {
                value: Expr::FString(parts),
                ..
            } => {
                assert_eq!(parts.len(), 4);
                assert!(matches!(&parts[1], FStringPart::Expr { spec: Some(s), .. } if s == ",.2f"));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_parse_slice_and_comprehension() {
        assert!(matches!(
            first_kind("x = items[1:3]"),
            StmtKind::Assign { value: Expr::Subscript { .. }, .. }
        ));
        assert!(matches!(
            first_kind("cols = [c for c in df.columns if c != 'date']"),
            StmtKind::Assign { value: Expr::ListComp { .. }, .. }
        ));
    }

    #[test]
    fn test_parse_lambda_argument() {
        let StmtKind::Expr(Expr::Call { args, kwargs, .. }) =
            first_kind("df['sales'].apply(lambda v, k=2: v * k, axis=0)")
        else {
            panic!("expected call")
        };
        assert!(matches!(&args[0], Expr::Lambda { params, .. } if params.len() == 2));
        assert_eq!(kwargs[0].0, "axis");
    }

    #[test]
    fn test_syntax_errors_carry_line() {
        let err = parse("x = 1\ny = (2 +\n").unwrap_err();
        assert_eq!(err.fault, crate::script::error::Fault::Syntax);

        let err = parse("x = 1\nclass Foo:\n    pass\n").unwrap_err();
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("x = {}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse(&deep).unwrap_err();
        assert_eq!(err.fault, crate::script::error::Fault::Syntax);
        assert!(parse(&format!("x = {}1{}", "(".repeat(20), ")".repeat(20))).is_ok());
    }

    #[test]
    fn test_imports() {
        let program = parse("import pandas as pd\nfrom matplotlib import pyplot as plt\n").unwrap();
        assert!(matches!(
            &program.body[0].kind,
            StmtKind::Import { module, alias: Some(a) } if module == "pandas" && a == "pd"
        ));
        assert!(matches!(&program.body[1].kind, StmtKind::FromImport { .. }));
    }
}
