use std::mem::discriminant;

use unitscript_common::{CompileError, Span};
use unitscript_lexer::{Token, TokenKind};

use crate::ast::*;

/// Recursive-descent parser. Per the error policy, a single fatal
/// `SyntaxError` is raised at the first unexpected token — there is no
/// `synchronize()`-style recovery, so a parse error aborts immediately.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn current_span(&self) -> Span {
        self.current().span
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        discriminant(self.current_kind()) == discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        if self.at(&kind) {
            Ok(self.advance())
        } else {
            let span = self.current_span();
            Err(CompileError::syntax(
                format!("expected {}, found {:?}", what, self.current_kind()),
                span.line,
                span.column,
            ))
        }
    }

    fn expect_name(&mut self) -> Result<String, CompileError> {
        let span = self.current_span();
        match self.current_kind().clone() {
            TokenKind::Name(n) => {
                self.advance();
                Ok(n)
            }
            other => Err(CompileError::syntax(
                format!("expected identifier, found {:?}", other),
                span.line,
                span.column,
            )),
        }
    }

    fn expect_statement_end(&mut self) -> Result<(), CompileError> {
        self.expect(TokenKind::Newline, "end of statement")?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn parse_module(&mut self) -> Result<Module, CompileError> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        Ok(Module { statements })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect(TokenKind::Newline, "newline before indented block")?;
        self.expect(TokenKind::Indent, "indented block")?;
        let mut statements = Vec::new();
        while !self.at(&TokenKind::Dedent) && !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        self.expect(TokenKind::Dedent, "end of indented block")?;
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, CompileError> {
        match self.current_kind() {
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Def => self.parse_def(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Break => {
                let span = self.current_span();
                self.advance();
                self.expect_statement_end()?;
                Ok(Stmt::Break { span })
            }
            TokenKind::Continue => {
                let span = self.current_span();
                self.advance();
                self.expect_statement_end()?;
                Ok(Stmt::Continue { span })
            }
            TokenKind::Name(_) => self.parse_assign_or_expr_stmt(),
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, CompileError> {
        let span = self.current_span();
        self.advance(); // IF
        let cond = self.parse_expression()?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_block()?;
        let mut branches = vec![(cond, body)];

        while self.at(&TokenKind::Elif) {
            self.advance();
            let cond = self.parse_expression()?;
            self.expect(TokenKind::Colon, "':'")?;
            let body = self.parse_block()?;
            branches.push((cond, body));
        }

        let else_body = if self.eat(&TokenKind::Else) {
            self.expect(TokenKind::Colon, "':'")?;
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Stmt::If {
            branches,
            else_body,
            span,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, CompileError> {
        let span = self.current_span();
        self.advance(); // WHILE
        let condition = self.parse_expression()?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_block()?;
        Ok(Stmt::While {
            condition,
            body,
            span,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, CompileError> {
        let span = self.current_span();
        self.advance(); // FOR
        let var = self.expect_name()?;
        self.expect(TokenKind::In, "'in'")?;
        let iterable = self.parse_expression()?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_block()?;
        Ok(Stmt::For {
            var,
            iterable,
            body,
            span,
        })
    }

    fn parse_def(&mut self) -> Result<Stmt, CompileError> {
        let span = self.current_span();
        self.advance(); // DEF
        let name = self.expect_name()?;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            params.push(self.expect_name()?);
            while self.eat(&TokenKind::Comma) {
                params.push(self.expect_name()?);
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::Colon, "':'")?;
        let body = self.parse_block()?;
        Ok(Stmt::FunctionDef {
            name,
            params,
            body,
            span,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, CompileError> {
        let span = self.current_span();
        self.advance(); // RETURN
        let value = if self.at(&TokenKind::Newline) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_statement_end()?;
        Ok(Stmt::Return { value, span })
    }

    fn parse_assign_or_expr_stmt(&mut self) -> Result<Stmt, CompileError> {
        let next_is_assign_like = matches!(
            self.tokens.get(self.pos + 1).map(|t| &t.kind),
            Some(
                TokenKind::Eq
                    | TokenKind::PlusEq
                    | TokenKind::MinusEq
                    | TokenKind::StarEq
                    | TokenKind::SlashEq
            )
        );

        if !next_is_assign_like {
            return self.parse_expr_stmt();
        }

        let span = self.current_span();
        let name = self.expect_name()?;
        match self.current_kind().clone() {
            TokenKind::Eq => {
                self.advance();
                let value = self.parse_expression()?;
                self.expect_statement_end()?;
                Ok(Stmt::Assign { name, value, span })
            }
            TokenKind::PlusEq | TokenKind::MinusEq | TokenKind::StarEq | TokenKind::SlashEq => {
                let op = match self.advance().kind {
                    TokenKind::PlusEq => BinOp::Add,
                    TokenKind::MinusEq => BinOp::Sub,
                    TokenKind::StarEq => BinOp::Mul,
                    TokenKind::SlashEq => BinOp::Div,
                    _ => unreachable!(),
                };
                let value = self.parse_expression()?;
                self.expect_statement_end()?;
                Ok(Stmt::AugAssign {
                    name,
                    op,
                    value,
                    span,
                })
            }
            _ => unreachable!(),
        }
    }

    fn parse_expr_stmt(&mut self) -> Result<Stmt, CompileError> {
        let span = self.current_span();
        let expr = self.parse_expression()?;
        self.expect_statement_end()?;
        Ok(Stmt::Expr { expr, span })
    }

    // ---------------------------------------------------------------
    // Expressions — precedence low to high:
    // OR, AND, NOT, comparison, additive, multiplicative, unary minus,
    // power (right-associative), atom.
    // ---------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and()?;
        while self.at(&TokenKind::Or) {
            let span = self.current_span();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Logical(Box::new(left), LogicalOp::Or, Box::new(right), span);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_not()?;
        while self.at(&TokenKind::And) {
            let span = self.current_span();
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Logical(Box::new(left), LogicalOp::And, Box::new(right), span);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, CompileError> {
        if self.at(&TokenKind::Not) {
            let span = self.current_span();
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::Not(Box::new(operand), span));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::EqEq => CompareOp::Eq,
                TokenKind::NotEq => CompareOp::Ne,
                TokenKind::Lt => CompareOp::Lt,
                TokenKind::Gt => CompareOp::Gt,
                TokenKind::Le => CompareOp::Le,
                TokenKind::Ge => CompareOp::Ge,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Compare(Box::new(left), op, Box::new(right), span);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::BinaryOp(Box::new(left), op, Box::new(right), span);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinaryOp(Box::new(left), op, Box::new(right), span);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if self.at(&TokenKind::Minus) {
            let span = self.current_span();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::UnaryNeg(Box::new(operand), span));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, CompileError> {
        let left = self.parse_postfix()?;
        if self.at(&TokenKind::StarStar) {
            let span = self.current_span();
            self.advance();
            let right = self.parse_unary()?; // right-associative
            return Ok(Expr::BinaryOp(Box::new(left), BinOp::Pow, Box::new(right), span));
        }
        Ok(left)
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.current_kind() {
                TokenKind::Dot => {
                    let span = self.current_span();
                    self.advance();
                    let name = self.expect_name()?;
                    expr = Expr::Attr(Box::new(expr), name, span);
                }
                TokenKind::LParen => {
                    let span = self.current_span();
                    self.advance();
                    let mut args = Vec::new();
                    if !self.at(&TokenKind::RParen) {
                        args.push(self.parse_expression()?);
                        while self.eat(&TokenKind::Comma) {
                            args.push(self.parse_expression()?);
                        }
                    }
                    self.expect(TokenKind::RParen, "')'")?;
                    expr = Expr::Call(Box::new(expr), args, span);
                }
                TokenKind::LBracket => {
                    let span = self.current_span();
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index), span);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<Expr, CompileError> {
        let span = self.current_span();
        match self.current_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n, span))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s, span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true, span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false, span))
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::None(span))
            }
            TokenKind::Name(n) => {
                self.advance();
                Ok(Expr::Name(n, span))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.at(&TokenKind::RBracket) {
                    items.push(self.parse_expression()?);
                    while self.eat(&TokenKind::Comma) {
                        if self.at(&TokenKind::RBracket) {
                            break;
                        }
                        items.push(self.parse_expression()?);
                    }
                }
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(Expr::List(items, span))
            }
            other => Err(CompileError::syntax(
                format!("unexpected token {:?}", other),
                span.line,
                span.column,
            )),
        }
    }
}

/// Parse a token stream into a `Module`. Fails fast on the first
/// unexpected token; there is no error recovery.
pub fn parse_tokens(tokens: Vec<Token>) -> Result<Module, CompileError> {
    Parser::new(tokens).parse_module()
}

/// Tokenize and parse `source` in one step.
pub fn parse(source: &str) -> Result<Module, CompileError> {
    let tokens = unitscript_lexer::tokenize(source)?;
    parse_tokens(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assign_number() {
        let module = parse("x = 1\n").unwrap();
        assert_eq!(module.statements.len(), 1);
        match &module.statements[0] {
            Stmt::Assign { name, value, .. } => {
                assert_eq!(name, "x");
                assert!(matches!(value, Expr::Number(n, _) if *n == 1.0));
            }
            other => panic!("expected Assign, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_binary_precedence() {
        let module = parse("x = 2 + 3 * 4\n").unwrap();
        match &module.statements[0] {
            Stmt::Assign { value, .. } => match value {
                Expr::BinaryOp(lhs, BinOp::Add, rhs, _) => {
                    assert!(matches!(**lhs, Expr::Number(n, _) if n == 2.0));
                    assert!(matches!(**rhs, Expr::BinaryOp(_, BinOp::Mul, _, _)));
                }
                other => panic!("expected Add at top, got {:?}", other),
            },
            other => panic!("expected Assign, got {:?}", other),
        }
    }

    #[test]
    fn test_power_is_right_associative_and_binds_tighter_than_unary_minus() {
        let module = parse("x = -2 ** 2\n").unwrap();
        match &module.statements[0] {
            Stmt::Assign { value, .. } => match value {
                Expr::UnaryNeg(inner, _) => {
                    assert!(matches!(**inner, Expr::BinaryOp(_, BinOp::Pow, _, _)));
                }
                other => panic!("expected UnaryNeg at top, got {:?}", other),
            },
            other => panic!("expected Assign, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_if_elif_else() {
        let src = "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n";
        let module = parse(src).unwrap();
        match &module.statements[0] {
            Stmt::If {
                branches,
                else_body,
                ..
            } => {
                assert_eq!(branches.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_def_and_call() {
        let src = "def factorial(n):\n    if n <= 1:\n        return 1\n    return n * factorial(n - 1)\n";
        let module = parse(src).unwrap();
        match &module.statements[0] {
            Stmt::FunctionDef { name, params, body, .. } => {
                assert_eq!(name, "factorial");
                assert_eq!(params, &vec!["n".to_string()]);
                assert_eq!(body.len(), 2);
            }
            other => panic!("expected FunctionDef, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_list_literal() {
        let module = parse("x = [1, 2, 3]\n").unwrap();
        match &module.statements[0] {
            Stmt::Assign { value, .. } => {
                assert!(matches!(value, Expr::List(items, _) if items.len() == 3));
            }
            other => panic!("expected Assign, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_attr_and_call_chain() {
        let module = parse("x = self.scan().len\n").unwrap();
        match &module.statements[0] {
            Stmt::Assign { value, .. } => {
                assert!(matches!(value, Expr::Attr(_, name, _) if name == "len"));
            }
            other => panic!("expected Assign, got {:?}", other),
        }
    }

    #[test]
    fn test_break_outside_loop_parses_fine_syntactically() {
        // The parser does not reject this; loop-context checking is a
        // semantic (compiler) concern, not a syntactic one.
        let module = parse("break\n").unwrap();
        assert!(matches!(module.statements[0], Stmt::Break { .. }));
    }

    #[test]
    fn test_syntax_error_has_no_recovery() {
        let err = parse("x = \n").unwrap_err();
        assert!(matches!(
            err.kind,
            unitscript_common::CompileErrorKind::Syntax(_)
        ));
    }

    #[test]
    fn test_chained_comparison_is_left_associative() {
        let module = parse("x = a < b < c\n").unwrap();
        match &module.statements[0] {
            Stmt::Assign { value, .. } => match value {
                Expr::Compare(lhs, CompareOp::Lt, _, _) => {
                    assert!(matches!(**lhs, Expr::Compare(_, CompareOp::Lt, _, _)));
                }
                other => panic!("expected Compare, got {:?}", other),
            },
            other => panic!("expected Assign, got {:?}", other),
        }
    }
}
