//! Recursive-descent parser for the restricted Python-subset code
//! front-end (spec.md §4.1). Tokenizes via [`super::lexer::Lexer`] then
//! builds the shared [`crate::ir`] tree.

use crate::diagnostics::SourceLoc;
use crate::error::{CamelError, CamelResult};
use crate::ir::{
    BinOpKind, BoolOpKind, CompareOp, ComprehensionClause, Expr, FieldSpec, FieldType, Program,
    Schema, Step, UnaryOpKind,
};
use crate::parser::lexer::{Lexer, Tok, Token};
use crate::value::Value;
use std::collections::BTreeMap;

pub fn parse(source: &str) -> CamelResult<Program> {
    let lexer = Lexer::new(source);
    let tokens = lexer.tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source_lines: source.split('\n').map(|s| s.to_string()).collect(),
    };
    let steps = parser.parse_stmt_list_until_eof()?;
    Ok(Program { steps })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    source_lines: Vec<String>,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn loc(&self) -> SourceLoc {
        let t = self.current();
        let text = self
            .source_lines
            .get(t.line.saturating_sub(1))
            .cloned()
            .unwrap_or_default();
        SourceLoc::new(t.line, t.column, text)
    }

    fn err(&self, message: impl Into<String>) -> CamelError {
        CamelError::parse(message, Some(self.loc()))
    }

    fn expect(&mut self, expected: Tok) -> CamelResult<Token> {
        if std::mem::discriminant(self.peek()) == std::mem::discriminant(&expected) {
            Ok(self.advance())
        } else {
            Err(self.err(format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.advance();
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    // -----------------------------------------------------------------
    // Statement sequences
    // -----------------------------------------------------------------

    fn parse_stmt_list_until_eof(&mut self) -> CamelResult<Vec<Step>> {
        let mut steps = Vec::new();
        self.skip_newlines();
        while !self.at_eof() {
            if matches!(self.peek(), Tok::Indent) {
                return Err(self.err("unexpected indent"));
            }
            steps.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        Ok(steps)
    }

    /// `NEWLINE INDENT stmt* DEDENT`
    fn parse_block(&mut self) -> CamelResult<Vec<Step>> {
        self.skip_newlines();
        self.expect(Tok::Indent)?;
        let mut steps = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.peek(), Tok::Dedent | Tok::Eof) {
                break;
            }
            steps.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        if matches!(self.peek(), Tok::Dedent) {
            self.advance();
        }
        if steps.is_empty() {
            return Err(self.err("block body may not be empty"));
        }
        Ok(steps)
    }

    fn parse_stmt(&mut self) -> CamelResult<Step> {
        match self.peek() {
            Tok::If => self.parse_if_stmt(),
            Tok::For => self.parse_for_stmt(),
            Tok::Raise => self.parse_raise_stmt(),
            _ => {
                let core = self.parse_simple_stmt_core()?;
                let wrapped = self.maybe_wrap_trailing_conditional(core)?;
                self.expect(Tok::Newline)?;
                Ok(wrapped)
            }
        }
    }

    fn parse_if_stmt(&mut self) -> CamelResult<Step> {
        self.advance(); // 'if'
        let cond = self.parse_expr()?;
        self.expect(Tok::Colon)?;
        let then_branch = self.parse_block()?;
        let else_branch = self.parse_elif_or_else()?;
        Ok(Step::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_elif_or_else(&mut self) -> CamelResult<Vec<Step>> {
        self.skip_newlines();
        match self.peek() {
            Tok::Elif => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(Tok::Colon)?;
                let then_branch = self.parse_block()?;
                let else_branch = self.parse_elif_or_else()?;
                Ok(vec![Step::If {
                    cond,
                    then_branch,
                    else_branch,
                }])
            }
            Tok::Else => {
                self.advance();
                self.expect(Tok::Colon)?;
                self.parse_block()
            }
            _ => Ok(Vec::new()),
        }
    }

    fn parse_for_stmt(&mut self) -> CamelResult<Step> {
        self.advance(); // 'for'
        let targets = self.parse_target_list()?;
        self.expect(Tok::In)?;
        let iterable = self.parse_expr()?;
        self.expect(Tok::Colon)?;
        let body = self.parse_block()?;
        Ok(Step::For {
            targets,
            iterable,
            body,
        })
    }

    fn parse_raise_stmt(&mut self) -> CamelResult<Step> {
        self.advance(); // 'raise'
        let error = self.parse_expr()?;
        self.expect(Tok::Newline)?;
        Ok(Step::Raise { error })
    }

    /// Parses `<ident> (',' <ident>)*` used by `for` targets and unpacking
    /// assignment targets.
    fn parse_target_list(&mut self) -> CamelResult<Vec<String>> {
        let mut targets = vec![self.parse_ident()?];
        while matches!(self.peek(), Tok::Comma) {
            self.advance();
            targets.push(self.parse_ident()?);
        }
        Ok(targets)
    }

    fn parse_ident(&mut self) -> CamelResult<String> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.err(format!("expected identifier, found {other:?}"))),
        }
    }

    /// If the just-parsed simple statement is followed by `if <cond> else
    /// <stmt>`, wrap it as an `If` step (spec.md scenario 1's
    /// `final("ok") if value == 7 else final("bad")` shorthand). Expression-
    /// level ternaries are not part of the expression grammar (§3 lists no
    /// such Expr variant) — this modifier exists at statement granularity only.
    fn maybe_wrap_trailing_conditional(&mut self, core: Step) -> CamelResult<Step> {
        if !matches!(self.peek(), Tok::If) {
            return Ok(core);
        }
        self.advance();
        let cond = self.parse_expr()?;
        self.expect(Tok::Else)?;
        let else_core = self.parse_simple_stmt_core()?;
        let else_branch = self.maybe_wrap_trailing_conditional(else_core)?;
        Ok(Step::If {
            cond,
            then_branch: vec![core],
            else_branch: vec![else_branch],
        })
    }

    /// Parses one of: `raise` (handled earlier), assignment, augmented
    /// assignment, unpack, or a call statement (`Tool`/`Qllm`/`Final`).
    fn parse_simple_stmt_core(&mut self) -> CamelResult<Step> {
        if let Some(step) = self.try_parse_assignment()? {
            return Ok(step);
        }
        self.parse_call_statement()
    }

    /// Tries to parse `target(, target)* = expr` or `target OP= expr`.
    /// Returns `None` (resetting position) if the statement doesn't start
    /// with a valid assignment target sequence followed by an `=`-family
    /// operator.
    fn try_parse_assignment(&mut self) -> CamelResult<Option<Step>> {
        let save = self.pos;
        let mut targets = Vec::new();
        loop {
            match self.peek().clone() {
                Tok::Ident(name) => {
                    self.advance();
                    targets.push(name);
                }
                _ => {
                    self.pos = save;
                    return Ok(None);
                }
            }
            match self.peek() {
                Tok::Comma => {
                    self.advance();
                    continue;
                }
                _ => break,
            }
        }

        if targets.len() == 1 {
            let aug = match self.peek() {
                Tok::PlusEq => Some(BinOpKind::Add),
                Tok::MinusEq => Some(BinOpKind::Sub),
                Tok::StarEq => Some(BinOpKind::Mul),
                Tok::SlashEq => Some(BinOpKind::Div),
                Tok::PercentEq => Some(BinOpKind::Mod),
                _ => None,
            };
            if let Some(op) = aug {
                self.advance();
                let rhs = self.parse_expr()?;
                let target = targets.into_iter().next().unwrap();
                return Ok(Some(Step::Assign {
                    expr: Expr::BinOp {
                        op,
                        left: Box::new(Expr::Var(target.clone())),
                        right: Box::new(rhs),
                    },
                    target,
                }));
            }
        }

        if !matches!(self.peek(), Tok::Eq) {
            self.pos = save;
            return Ok(None);
        }
        self.advance(); // '='

        if targets.len() > 1 {
            let expr = self.parse_expr()?;
            return Ok(Some(Step::Unpack { targets, expr }));
        }

        let target = targets.into_iter().next().unwrap();

        // Special-case the two call forms that carry their own IR node.
        if let Tok::Ident(name) = self.peek().clone() {
            if name == "query_ai_assistant" && self.peek_is_call_ahead() {
                self.advance();
                return Ok(Some(self.parse_qllm_call(target)?));
            }
        }

        let expr = self.parse_expr()?;
        if let Expr::Call { func, args, kwargs } = &expr {
            if func != "query_ai_assistant"
                && func != "final"
                && !crate::whitelist::is_builtin_function(func)
            {
                if !args.is_empty() {
                    return Err(
                        self.err(format!("tool call '{func}' must use keyword arguments"))
                    );
                }
                return Ok(Some(Step::Tool {
                    name: func.clone(),
                    args: kwargs.clone(),
                    save_as: Some(target),
                    source_loc: Some(self.loc()),
                }));
            }
        }
        Ok(Some(Step::Assign { target, expr }))
    }

    fn peek_is_call_ahead(&self) -> bool {
        matches!(self.tokens.get(self.pos + 1).map(|t| &t.tok), Some(Tok::LParen))
    }

    /// A bare call statement: `print("hi")`, `send_message(to="x")`,
    /// `final("ok")`. No assignment target.
    fn parse_call_statement(&mut self) -> CamelResult<Step> {
        let loc = self.loc();
        let name = self.parse_ident()?;
        if name == "final" {
            self.expect(Tok::LParen)?;
            let arg = self.parse_expr()?;
            self.expect(Tok::RParen)?;
            let template = match arg {
                Expr::Literal(Value::Str(s)) => s,
                _ => return Err(self.err("final() requires a string literal argument")),
            };
            return Ok(Step::Final { template });
        }
        if name == "query_ai_assistant" {
            return Err(self.err("query_ai_assistant requires an assignment target"));
        }
        let (args, kwargs) = self.parse_call_args()?;
        if !args.is_empty() {
            return Err(self.err(format!("tool call '{name}' must use keyword arguments")));
        }
        Ok(Step::Tool {
            name,
            args: kwargs,
            save_as: None,
            source_loc: Some(loc),
        })
    }

    fn parse_qllm_call(&mut self, save_as: String) -> CamelResult<Step> {
        self.expect(Tok::LParen)?;
        let instruction_expr = self.parse_or()?;
        self.expect(Tok::Comma)?;
        let input = self.parse_or()?;
        self.expect(Tok::Comma)?;
        let schema_expr = self.parse_or()?;
        // trailing comma tolerance
        if matches!(self.peek(), Tok::Comma) {
            self.advance();
        }
        self.expect(Tok::RParen)?;
        let instruction = match instruction_expr {
            Expr::Literal(Value::Str(s)) => s,
            _ => {
                return Err(self.err("query_ai_assistant's instruction must be a string literal"))
            }
        };
        let schema = expr_to_schema(&schema_expr)
            .map_err(|msg| self.err(format!("invalid query_ai_assistant schema: {msg}")))?;
        Ok(Step::Qllm {
            save_as,
            instruction,
            input,
            schema,
        })
    }

    // -----------------------------------------------------------------
    // Expressions (precedence climbing)
    // -----------------------------------------------------------------

    fn parse_expr(&mut self) -> CamelResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> CamelResult<Expr> {
        let mut operands = vec![self.parse_and()?];
        while matches!(self.peek(), Tok::Or) {
            self.advance();
            operands.push(self.parse_and()?);
        }
        Ok(if operands.len() == 1 {
            operands.pop().unwrap()
        } else {
            Expr::BoolOp {
                op: BoolOpKind::Or,
                operands,
            }
        })
    }

    fn parse_and(&mut self) -> CamelResult<Expr> {
        let mut operands = vec![self.parse_not()?];
        while matches!(self.peek(), Tok::And) {
            self.advance();
            operands.push(self.parse_not()?);
        }
        Ok(if operands.len() == 1 {
            operands.pop().unwrap()
        } else {
            Expr::BoolOp {
                op: BoolOpKind::And,
                operands,
            }
        })
    }

    fn parse_not(&mut self) -> CamelResult<Expr> {
        if matches!(self.peek(), Tok::Not) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOpKind::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_membership()
    }

    /// `in`/`not in`/`is`/`is not`, non-chaining, binds tighter than and/or
    /// but looser than `==`-style comparisons.
    fn parse_membership(&mut self) -> CamelResult<Expr> {
        let left = self.parse_compare_chain()?;
        match self.peek() {
            Tok::In => {
                self.advance();
                let right = self.parse_compare_chain()?;
                Ok(Expr::In {
                    left: Box::new(left),
                    right: Box::new(right),
                    negate: false,
                })
            }
            Tok::Not if matches!(self.tokens.get(self.pos + 1).map(|t| &t.tok), Some(Tok::In)) => {
                self.advance();
                self.advance();
                let right = self.parse_compare_chain()?;
                Ok(Expr::In {
                    left: Box::new(left),
                    right: Box::new(right),
                    negate: true,
                })
            }
            Tok::Is => {
                self.advance();
                let negate = if matches!(self.peek(), Tok::Not) {
                    self.advance();
                    true
                } else {
                    false
                };
                let right = self.parse_compare_chain()?;
                Ok(Expr::Is {
                    left: Box::new(left),
                    right: Box::new(right),
                    negate,
                })
            }
            _ => Ok(left),
        }
    }

    fn parse_compare_chain(&mut self) -> CamelResult<Expr> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::EqEq => CompareOp::Eq,
                Tok::NotEq => CompareOp::NotEq,
                Tok::Lt => CompareOp::Lt,
                Tok::LtEq => CompareOp::LtEq,
                Tok::Gt => CompareOp::Gt,
                Tok::GtEq => CompareOp::GtEq,
                _ => break,
            };
            self.advance();
            rest.push((op, self.parse_additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_additive(&mut self) -> CamelResult<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOpKind::Add,
                Tok::Minus => BinOpKind::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> CamelResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOpKind::Mul,
                Tok::Slash => BinOpKind::Div,
                Tok::Percent => BinOpKind::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> CamelResult<Expr> {
        match self.peek() {
            Tok::Minus => {
                self.advance();
                Ok(Expr::UnaryOp {
                    op: UnaryOpKind::Neg,
                    operand: Box::new(self.parse_unary()?),
                })
            }
            Tok::Plus => {
                self.advance();
                Ok(Expr::UnaryOp {
                    op: UnaryOpKind::Pos,
                    operand: Box::new(self.parse_unary()?),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> CamelResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    let name = self.parse_ident()?;
                    if matches!(self.peek(), Tok::LParen) {
                        let (args, _kwargs) = self.parse_call_args()?;
                        expr = Expr::MethodCall {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                        };
                    } else {
                        expr = match expr {
                            Expr::Attr { base, mut path } => {
                                path.push(name);
                                Expr::Attr { base, path }
                            }
                            other => Expr::Attr {
                                base: Box::new(other),
                                path: vec![name],
                            },
                        };
                    }
                }
                Tok::LBracket => {
                    self.advance();
                    expr = self.parse_subscript(expr)?;
                }
                Tok::LParen if matches!(expr, Expr::Var(_)) => {
                    if let Expr::Var(name) = expr {
                        let (args, kwargs) = self.parse_call_args()?;
                        expr = Expr::Call { func: name, args, kwargs };
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Parses `[expr]` (index) or `[start:stop:step]` (slice) after the
    /// opening `[` has already been consumed.
    fn parse_subscript(&mut self, base: Expr) -> CamelResult<Expr> {
        if matches!(self.peek(), Tok::Colon) {
            return self.parse_slice_rest(base, None);
        }
        let first = self.parse_or()?;
        if matches!(self.peek(), Tok::Colon) {
            return self.parse_slice_rest(base, Some(first));
        }
        self.expect(Tok::RBracket)?;
        Ok(Expr::Index {
            base: Box::new(base),
            index: Box::new(first),
        })
    }

    fn parse_slice_rest(&mut self, base: Expr, start: Option<Expr>) -> CamelResult<Expr> {
        self.expect(Tok::Colon)?;
        let stop = if matches!(self.peek(), Tok::Colon | Tok::RBracket) {
            None
        } else {
            Some(self.parse_or()?)
        };
        let step = if matches!(self.peek(), Tok::Colon) {
            self.advance();
            if matches!(self.peek(), Tok::RBracket) {
                None
            } else {
                Some(self.parse_or()?)
            }
        } else {
            None
        };
        self.expect(Tok::RBracket)?;
        Ok(Expr::Slice {
            base: Box::new(base),
            start: start.map(Box::new),
            stop: stop.map(Box::new),
            step: step.map(Box::new),
        })
    }

    /// Parses `(args)` after the callee, returning (positional, keyword).
    fn parse_call_args(&mut self) -> CamelResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        self.expect(Tok::LParen)?;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if !matches!(self.peek(), Tok::RParen) {
            loop {
                if let Tok::Ident(name) = self.peek().clone() {
                    if matches!(self.tokens.get(self.pos + 1).map(|t| &t.tok), Some(Tok::Eq)) {
                        self.advance();
                        self.advance();
                        kwargs.push((name, self.parse_or()?));
                        if matches!(self.peek(), Tok::Comma) {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                args.push(self.parse_or()?);
                if matches!(self.peek(), Tok::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(Tok::RParen)?;
        Ok((args, kwargs))
    }

    fn parse_atom(&mut self) -> CamelResult<Expr> {
        match self.peek().clone() {
            Tok::Int(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Int(n)))
            }
            Tok::Float(f) => {
                self.advance();
                Ok(Expr::Literal(Value::Float(f)))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Str(s)))
            }
            Tok::True => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(true)))
            }
            Tok::False => {
                self.advance();
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Tok::None => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            Tok::Ident(name) => {
                self.advance();
                Ok(Expr::Var(name))
            }
            Tok::LParen => {
                self.advance();
                if matches!(self.peek(), Tok::RParen) {
                    self.advance();
                    return Ok(Expr::TupleLit(Vec::new()));
                }
                let first = self.parse_or()?;
                if matches!(self.peek(), Tok::Comma) {
                    let mut items = vec![first];
                    while matches!(self.peek(), Tok::Comma) {
                        self.advance();
                        if matches!(self.peek(), Tok::RParen) {
                            break;
                        }
                        items.push(self.parse_or()?);
                    }
                    self.expect(Tok::RParen)?;
                    return Ok(Expr::TupleLit(items));
                }
                self.expect(Tok::RParen)?;
                Ok(first)
            }
            Tok::LBracket => self.parse_list_or_comprehension(),
            Tok::LBrace => self.parse_dict_or_set(),
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_list_or_comprehension(&mut self) -> CamelResult<Expr> {
        self.advance(); // '['
        if matches!(self.peek(), Tok::RBracket) {
            self.advance();
            return Ok(Expr::ListLit(Vec::new()));
        }
        let first = self.parse_or()?;
        if matches!(self.peek(), Tok::For) {
            let clauses = self.parse_comprehension_clauses()?;
            self.expect(Tok::RBracket)?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                clauses,
            });
        }
        let mut items = vec![first];
        while matches!(self.peek(), Tok::Comma) {
            self.advance();
            if matches!(self.peek(), Tok::RBracket) {
                break;
            }
            items.push(self.parse_or()?);
        }
        self.expect(Tok::RBracket)?;
        Ok(Expr::ListLit(items))
    }

    fn parse_dict_or_set(&mut self) -> CamelResult<Expr> {
        self.advance(); // '{'
        if matches!(self.peek(), Tok::RBrace) {
            self.advance();
            return Ok(Expr::DictLit(Vec::new()));
        }
        let first_key = self.parse_or()?;
        if matches!(self.peek(), Tok::Colon) {
            self.advance();
            let first_val = self.parse_or()?;
            if matches!(self.peek(), Tok::For) {
                let clauses = self.parse_comprehension_clauses()?;
                self.expect(Tok::RBrace)?;
                return Ok(Expr::DictComp {
                    key: Box::new(first_key),
                    value: Box::new(first_val),
                    clauses,
                });
            }
            let mut pairs = vec![(first_key, first_val)];
            while matches!(self.peek(), Tok::Comma) {
                self.advance();
                if matches!(self.peek(), Tok::RBrace) {
                    break;
                }
                let k = self.parse_or()?;
                self.expect(Tok::Colon)?;
                let v = self.parse_or()?;
                pairs.push((k, v));
            }
            self.expect(Tok::RBrace)?;
            return Ok(Expr::DictLit(pairs));
        }
        if matches!(self.peek(), Tok::For) {
            let clauses = self.parse_comprehension_clauses()?;
            self.expect(Tok::RBrace)?;
            return Ok(Expr::SetComp {
                elt: Box::new(first_key),
                clauses,
            });
        }
        let mut items = vec![first_key];
        while matches!(self.peek(), Tok::Comma) {
            self.advance();
            if matches!(self.peek(), Tok::RBrace) {
                break;
            }
            items.push(self.parse_or()?);
        }
        self.expect(Tok::RBrace)?;
        Ok(Expr::SetLit(items))
    }

    fn parse_comprehension_clauses(&mut self) -> CamelResult<Vec<ComprehensionClause>> {
        let mut clauses = Vec::new();
        while matches!(self.peek(), Tok::For) {
            self.advance();
            let targets = self.parse_target_list()?;
            self.expect(Tok::In)?;
            let iterable = self.parse_or()?;
            let mut ifs = Vec::new();
            while matches!(self.peek(), Tok::If) {
                self.advance();
                ifs.push(self.parse_or()?);
            }
            clauses.push(ComprehensionClause {
                targets,
                iterable,
                ifs,
            });
        }
        Ok(clauses)
    }
}

/// Converts a parsed dict-literal expression into a [`Schema`]. The schema
/// passed to `query_ai_assistant` must be a structural literal (no
/// variables) — this mirrors how `final`'s template and `query_ai_assistant`'s
/// instruction are also literal strings, not arbitrary expressions.
fn expr_to_schema(expr: &Expr) -> Result<Schema, String> {
    let pairs = match expr {
        Expr::DictLit(pairs) => pairs,
        _ => return Err("schema must be an object literal".to_string()),
    };
    let mut description = None;
    let mut fields = BTreeMap::new();
    for (k, v) in pairs {
        let key = expr_literal_string(k)?;
        match key.as_str() {
            "description" => description = Some(expr_literal_string(v)?),
            "fields" => {
                let field_pairs = match v {
                    Expr::DictLit(p) => p,
                    _ => return Err("'fields' must be an object literal".to_string()),
                };
                for (fk, fv) in field_pairs {
                    let field_name = expr_literal_string(fk)?;
                    fields.insert(field_name, expr_to_field_spec(fv)?);
                }
            }
            other => return Err(format!("unexpected schema key '{other}'")),
        }
    }
    Ok(Schema { description, fields })
}

fn expr_to_field_spec(expr: &Expr) -> Result<FieldSpec, String> {
    let pairs = match expr {
        Expr::DictLit(pairs) => pairs,
        _ => return Err("field spec must be an object literal".to_string()),
    };
    let mut field_type = None;
    let mut required = false;
    let mut description = None;
    let mut items = None;
    let mut properties = None;
    for (k, v) in pairs {
        let key = expr_literal_string(k)?;
        match key.as_str() {
            "type" => field_type = Some(parse_field_type(&expr_literal_string(v)?)?),
            "required" => {
                required = matches!(v, Expr::Literal(Value::Bool(true)));
            }
            "description" => description = Some(expr_literal_string(v)?),
            "items" => items = Some(Box::new(expr_to_field_spec(v)?)),
            "properties" => {
                let prop_pairs = match v {
                    Expr::DictLit(p) => p,
                    _ => return Err("'properties' must be an object literal".to_string()),
                };
                let mut map = BTreeMap::new();
                for (pk, pv) in prop_pairs {
                    map.insert(expr_literal_string(pk)?, expr_to_field_spec(pv)?);
                }
                properties = Some(map);
            }
            other => return Err(format!("unexpected field key '{other}'")),
        }
    }
    Ok(FieldSpec {
        field_type: field_type.ok_or("field spec missing 'type'")?,
        required,
        description,
        items,
        properties,
    })
}

fn parse_field_type(s: &str) -> Result<FieldType, String> {
    Ok(match s {
        "string" => FieldType::String,
        "number" => FieldType::Number,
        "integer" => FieldType::Integer,
        "boolean" => FieldType::Boolean,
        "email" => FieldType::Email,
        "datetime" => FieldType::Datetime,
        "array" => FieldType::Array,
        "object" => FieldType::Object,
        other => return Err(format!("unknown field type '{other}'")),
    })
}

fn expr_literal_string(expr: &Expr) -> Result<String, String> {
    match expr {
        Expr::Literal(Value::Str(s)) => Ok(s.clone()),
        _ => Err("expected a string literal".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_and_conditional_final() {
        let program =
            parse("value = 1 + 2 * 3\nfinal(\"ok\") if value == 7 else final(\"bad\")\n").unwrap();
        assert_eq!(program.steps.len(), 2);
        assert!(matches!(program.steps[0], Step::Assign { .. }));
        assert!(matches!(program.steps[1], Step::If { .. }));
    }

    #[test]
    fn parses_qllm_and_tool_call() {
        let program = parse(
            "r = query_ai_assistant(\"extract name\", {\"text\": \"name is Alice\"}, {\"fields\": {\"name\": {\"type\": \"string\", \"required\": true}}})\nsend_message(to=\"x\", body=r.name)\n",
        )
        .unwrap();
        assert!(matches!(program.steps[0], Step::Qllm { .. }));
        match &program.steps[1] {
            Step::Tool { name, args, save_as, .. } => {
                assert_eq!(name, "send_message");
                assert_eq!(args.len(), 2);
                assert!(save_as.is_none());
            }
            other => panic!("expected Tool step, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_tool_positional_args() {
        let err = parse("open(\"/tmp/x\")\n");
        // positional args for a tool-like call are rejected at parse time.
        assert!(err.is_err());
    }

    #[test]
    fn step_count_boundary_64_ok_65_fails() {
        let mut src = String::new();
        for i in 0..64 {
            src.push_str(&format!("x{i} = {i}\n"));
        }
        let program = parse(&src).unwrap();
        assert_eq!(program.total_step_count(), 64);
    }

    #[test]
    fn for_loop_and_if_parse() {
        let program = parse("for x in items:\n    if x > 1:\n        y = x\n").unwrap();
        assert_eq!(program.steps.len(), 1);
        assert!(matches!(program.steps[0], Step::For { .. }));
    }

    #[test]
    fn slice_with_step_parses() {
        let program = parse("y = x[1:10:2]\n").unwrap();
        match &program.steps[0] {
            Step::Assign { expr: Expr::Slice { .. }, .. } => {}
            other => panic!("expected slice assign, got {other:?}"),
        }
    }

    #[test]
    fn list_comprehension_with_guard_parses() {
        let program = parse("y = [x for x in items if x > 0]\n").unwrap();
        match &program.steps[0] {
            Step::Assign { expr: Expr::ListComp { clauses, .. }, .. } => {
                assert_eq!(clauses.len(), 1);
                assert_eq!(clauses[0].ifs.len(), 1);
            }
            other => panic!("expected list comprehension, got {other:?}"),
        }
    }
}
