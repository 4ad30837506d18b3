//! The expression and statement compiler.
//!
//! A recursive-descent front end that drives the code generator directly;
//! there is no AST. Precedence, lowest first: `or`/`xor`, `and`/shifts,
//! `not`, relations (`== <> < > <= >=`, `in`), additive, multiplicative,
//! concatenation `|`, prefixes (`-`, `?`, `#`, `as`, `is`), designators
//! (indexing, members), atoms (literals, identifiers, `(expr)`,
//! `[vector]`, `{set/dict}`, `if(c,a,b)`, `typeof`).
//!
//! Statements: `def`, `var`, `const`, assignment and compound assignment,
//! `ins`/`del`, `assert`, `dump`, `exit`. Statements are separated by
//! newlines or `;`.

use std::sync::Arc;

use shn_core::Variant;
use shn_runtime::fifo::Fifo;
use shn_runtime::opcodes::Op;
use shn_runtime::types::{StateId, Symbol, TypeId};
use shn_runtime::world::World;

use crate::codegen::CodeGen;
use crate::config::CompilerOptions;
use crate::error::CompileError;
use crate::lexer::{Lexer, Tok};

type CResult<T> = Result<T, CompileError>;

struct LocalVar {
    name: String,
    ty: TypeId,
    offs: i8,
}

pub struct Compiler<'w> {
    w: &'w mut World,
    lex: Lexer,
    module: StateId,
    gen: CodeGen,
    opts: CompilerOptions,
    locals: Vec<LocalVar>,
}

/// Compile one module from a source fifo into the world. The module's
/// initializer code is installed on success.
pub fn compile_module(
    w: &mut World,
    name: &str,
    src: Arc<dyn Fifo>,
    opts: &CompilerOptions,
) -> CResult<StateId> {
    let module = w.add_module(name);
    let lex = Lexer::new(src, name)?;
    let gen = CodeGen::new(module, module);
    let mut c = Compiler { w, lex, module, gen, opts: opts.clone(), locals: Vec::new() };
    c.run()?;
    Ok(module)
}

impl<'w> Compiler<'w> {
    fn run(&mut self) -> CResult<()> {
        loop {
            self.lex.skip_seps()?;
            if self.lex.tok == Tok::Eof {
                break;
            }
            self.statement()?;
        }
        let gen = std::mem::replace(&mut self.gen, CodeGen::new_const(self.module, self.module));
        gen.install(self.w);
        Ok(())
    }

    // --- statements -------------------------------------------------------- //

    fn statement(&mut self) -> CResult<()> {
        if self.opts.line_numbers {
            let line = self.lex.line();
            self.gen.linenum(line);
        }
        match self.lex.tok {
            Tok::KwDef => self.def_statement()?,
            Tok::KwVar => self.var_statement()?,
            Tok::KwConst => self.const_statement()?,
            Tok::KwAssert => self.assert_statement()?,
            Tok::KwDump => self.dump_statement()?,
            Tok::KwExit => {
                self.lex.next()?;
                self.expression(None)?;
                self.gen.program_exit();
            }
            Tok::KwIns => {
                self.lex.next()?;
                self.designator(None)?;
                let storer = self.gen.ins_lvalue()?;
                self.lex.expect(Tok::Assign, "'='")?;
                self.expression(None)?;
                self.gen.assignment(self.w, &storer)?;
            }
            Tok::KwDel => {
                self.lex.next()?;
                self.designator(None)?;
                self.gen.delete_elem()?;
            }
            _ => self.assignment_statement()?,
        }
        if self.lex.tok != Tok::Sep && self.lex.tok != Tok::Eof {
            return Err(self.lex.error("End of statement expected"));
        }
        Ok(())
    }

    /// `def name = expr`: a module variable initialized by module code.
    fn def_statement(&mut self) -> CResult<()> {
        self.lex.next()?;
        let name = self.lex.get_identifier()?;
        self.lex.expect(Tok::Assign, "'='")?;
        self.expression(None)?;
        let ty = self.gen.stk_type();
        let id = self.w.add_self_var(self.module, &name, ty)?;
        self.gen.init_self_var(self.w, id)
    }

    /// `var name = expr`: a local living on the operand stack.
    fn var_statement(&mut self) -> CResult<()> {
        self.lex.next()?;
        let name = self.lex.get_identifier()?;
        self.lex.expect(Tok::Assign, "'='")?;
        self.expression(None)?;
        let ty = self.gen.stk_type();
        if self.locals.len() >= 127 {
            return Err(self.lex.error("Too many local variables"));
        }
        if self.locals.iter().any(|l| l.name == name) {
            return Err(CompileError::Duplicate(name));
        }
        let offs = self.locals.len() as i8;
        self.gen.init_stk_var(self.w, ty)?;
        self.locals.push(LocalVar { name, ty, offs });
        Ok(())
    }

    /// `const name = expr`: folded at compile time into a definition.
    fn const_statement(&mut self) -> CResult<()> {
        self.lex.next()?;
        let name = self.lex.get_identifier()?;
        self.lex.expect(Tok::Assign, "'='")?;
        let (value, ty) = self.const_value(None)?;
        self.w.add_definition(self.module, &name, ty, value)?;
        Ok(())
    }

    fn assert_statement(&mut self) -> CResult<()> {
        let line = self.lex.line();
        self.lex.next()?;
        if self.opts.enable_assert {
            self.lex.start_recording();
            self.expression(None)?;
            let cond = self.lex.stop_recording();
            self.gen.assertion(self.w, line, &cond)
        } else {
            self.expression(None)?;
            self.gen.undo_subexpr();
            Ok(())
        }
    }

    fn dump_statement(&mut self) -> CResult<()> {
        self.lex.next()?;
        if self.opts.enable_dump {
            self.lex.start_recording();
            self.expression(None)?;
            let expr = self.lex.stop_recording();
            self.gen.dump_var(&expr);
            Ok(())
        } else {
            self.expression(None)?;
            self.gen.undo_subexpr();
            Ok(())
        }
    }

    /// designator followed by `=`, a compound assignment, or nothing
    /// useful.
    fn assignment_statement(&mut self) -> CResult<()> {
        self.designator(None)?;
        match self.lex.tok {
            Tok::Assign => {
                self.lex.next()?;
                let storer = self.gen.lvalue()?;
                self.expression(None)?;
                self.gen.assignment(self.w, &storer)
            }
            Tok::AddAssign | Tok::SubAssign | Tok::MulAssign | Tok::DivAssign
            | Tok::ModAssign => {
                let op = match self.lex.tok {
                    Tok::AddAssign => Op::AddAssign,
                    Tok::SubAssign => Op::SubAssign,
                    Tok::MulAssign => Op::MulAssign,
                    Tok::DivAssign => Op::DivAssign,
                    _ => Op::ModAssign,
                };
                self.lex.next()?;
                let storer = self.gen.arithm_lvalue(self.w, op)?;
                self.expression(None)?;
                self.gen.assignment(self.w, &storer)
            }
            Tok::CatAssign => {
                self.lex.next()?;
                self.gen.cat_lvalue(self.w)?;
                self.expression(None)?;
                self.gen.cat_assign(self.w)
            }
            _ => Err(self.lex.error("Assignment operator expected")),
        }
    }

    // --- constant folding ---------------------------------------------------- //

    /// Compile an expression with a scratch compile-time generator and run
    /// it immediately on the VM.
    fn const_value(&mut self, expect: Option<TypeId>) -> CResult<(Variant, TypeId)> {
        let saved =
            std::mem::replace(&mut self.gen, CodeGen::new_const(self.module, self.module));
        let parse_expect = match expect {
            Some(t) if self.w.is_typeref(t) => None,
            other => other,
        };
        let parsed = self.expression(parse_expect);
        let cgen = std::mem::replace(&mut self.gen, saved);
        parsed?;
        cgen.run_const_expr(self.w, expect)
    }

    /// An atomic type value: a designator that must fold to a type
    /// reference.
    fn type_value(&mut self) -> CResult<TypeId> {
        let tr = self.w.def_typeref;
        self.designator(Some(tr))?;
        self.gen.undo_type_ref(self.w)
    }

    // --- expressions ---------------------------------------------------------- //

    fn expression(&mut self, expect: Option<TypeId>) -> CResult<()> {
        match expect {
            None => self.or_level()?,
            Some(t) if self.w.is_bool(t) => self.or_level()?,
            Some(t) if self.w.type_(t).is_any_cont() => self.concat_expr(Some(t))?,
            Some(t) if self.w.is_reference(t) => self.designator(Some(t))?,
            _ => self.arithm_expr()?,
        }
        if let Some(t) = expect {
            self.gen.implicit_cast(self.w, t, "Type mismatch")?;
        }
        Ok(())
    }

    fn or_level(&mut self) -> CResult<()> {
        self.and_level()?;
        while self.lex.tok == Tok::KwOr || self.lex.tok == Tok::KwXor {
            let ty = self.gen.stk_type();
            if self.w.is_bool(ty) && self.lex.tok == Tok::KwOr {
                self.lex.next()?;
                let site = self.gen.bool_jump_forward(self.w, Op::JumpOr)?;
                self.or_level()?;
                let b = self.w.def_bool;
                self.gen.implicit_cast(self.w, b, "Boolean expected")?;
                self.gen.resolve_jump(site)?;
                break;
            }
            let op = if self.lex.tok == Tok::KwOr { Op::BitOr } else { Op::BitXor };
            self.lex.next()?;
            self.and_level()?;
            self.gen.arithm_binary(self.w, op)?;
        }
        Ok(())
    }

    fn and_level(&mut self) -> CResult<()> {
        self.not_level()?;
        loop {
            match self.lex.tok {
                Tok::KwAnd => {
                    let ty = self.gen.stk_type();
                    if self.w.is_bool(ty) {
                        self.lex.next()?;
                        let site = self.gen.bool_jump_forward(self.w, Op::JumpAnd)?;
                        self.and_level()?;
                        let b = self.w.def_bool;
                        self.gen.implicit_cast(self.w, b, "Boolean expected")?;
                        self.gen.resolve_jump(site)?;
                        return Ok(());
                    }
                    self.lex.next()?;
                    self.not_level()?;
                    self.gen.arithm_binary(self.w, Op::BitAnd)?;
                }
                Tok::Shl | Tok::Shr => {
                    let op = if self.lex.tok == Tok::Shl { Op::BitShl } else { Op::BitShr };
                    self.lex.next()?;
                    self.not_level()?;
                    self.gen.arithm_binary(self.w, op)?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn not_level(&mut self) -> CResult<()> {
        let is_not = self.lex.skip_if(Tok::KwNot)?;
        self.relation()?;
        if is_not {
            self.gen.not_op(self.w)?;
        }
        Ok(())
    }

    fn relation(&mut self) -> CResult<()> {
        self.arithm_expr()?;
        if self.lex.skip_if(Tok::KwIn)? {
            self.arithm_expr()?;
            let right = self.gen.stk_type();
            if self.w.is_typeref(right) {
                self.gen.in_bounds(self.w)?;
            } else if self.w.type_(right).is_any_cont() {
                self.gen.in_cont(self.w)?;
            } else if self.w.type_(right).is_any_ord() && self.lex.skip_if(Tok::Range)? {
                self.arithm_expr()?;
                self.gen.in_range(self.w, false)?;
            } else {
                return Err(self
                    .lex
                    .error("'in' expects container, numeric range, or ordinal type"));
            }
        } else if let Some(op) = cmp_op(self.lex.tok) {
            self.lex.next()?;
            self.arithm_expr()?;
            self.gen.cmp(self.w, op)?;
        }
        Ok(())
    }

    fn arithm_expr(&mut self) -> CResult<()> {
        self.term()?;
        while self.lex.tok == Tok::Plus || self.lex.tok == Tok::Minus {
            let op = if self.lex.tok == Tok::Plus { Op::Add } else { Op::Sub };
            self.lex.next()?;
            self.term()?;
            self.gen.arithm_binary(self.w, op)?;
        }
        Ok(())
    }

    fn term(&mut self) -> CResult<()> {
        self.concat_expr(None)?;
        while matches!(self.lex.tok, Tok::Star | Tok::Slash | Tok::KwMod) {
            let op = match self.lex.tok {
                Tok::Star => Op::Mul,
                Tok::Slash => Op::Div,
                _ => Op::Mod,
            };
            self.lex.next()?;
            self.factor(None)?;
            self.gen.arithm_binary(self.w, op)?;
        }
        Ok(())
    }

    /// `a | b | c` concatenation; elements auto-wrap into vectors.
    fn concat_expr(&mut self, cont_hint: Option<TypeId>) -> CResult<()> {
        self.factor(cont_hint)?;
        if self.lex.tok != Tok::Cat {
            return Ok(());
        }
        let top = self.gen.stk_type();
        let cont = if self.w.is_any_vec(top) {
            match cont_hint {
                Some(h) => {
                    self.gen.implicit_cast(self.w, h, "Vector type mismatch")?;
                    h
                }
                None => top,
            }
        } else {
            self.gen.elem_to_vec(self.w, cont_hint)?
        };
        while self.lex.skip_if(Tok::Cat)? {
            self.factor(Some(cont))?;
            if self.gen.try_implicit_cast(self.w, cont)? {
                self.gen.cat(self.w)?;
            } else {
                self.gen.elem_cat(self.w)?;
            }
        }
        Ok(())
    }

    fn factor(&mut self, hint: Option<TypeId>) -> CResult<()> {
        let is_neg = self.lex.skip_if(Tok::Minus)?;
        let is_q = self.lex.skip_if(Tok::Question)?;
        let is_len = self.lex.skip_if(Tok::Hash)?;

        self.designator(hint)?;

        if is_len {
            self.gen.length(self.w)?;
        }
        if is_q {
            self.gen.non_empty(self.w);
        }
        if is_neg {
            self.gen.arithm_unary(self.w, Op::Neg)?;
        }
        if self.lex.skip_if(Tok::KwAs)? {
            let t = self.type_value()?;
            self.gen.explicit_cast(self.w, t)?;
        }
        if self.lex.skip_if(Tok::KwIs)? {
            let t = self.type_value()?;
            self.gen.is_type(self.w, t);
        }
        Ok(())
    }

    fn designator(&mut self, hint: Option<TypeId>) -> CResult<()> {
        let is_at = self.lex.skip_if(Tok::At)?;
        let ref_hint = match hint {
            Some(t) if self.w.is_reference(t) => match self.w.type_(t).kind {
                shn_runtime::types::TypeKind::Ref(to) => Some(to),
                _ => None,
            },
            _ => None,
        };

        self.atom(ref_hint.or(hint))?;

        loop {
            if self.lex.skip_if(Tok::Period)? {
                self.gen.deref(self.w)?;
                let ident = self.lex.get_identifier()?;
                self.member_selection(&ident)?;
            } else if self.lex.skip_if(Tok::LSquare)? {
                self.gen.deref(self.w)?;
                self.expression(None)?;
                self.gen.load_container_elem(self.w)?;
                self.lex.expect(Tok::RSquare, "']'")?;
            } else {
                break;
            }
        }

        if is_at || ref_hint.is_some() {
            self.gen.mkref(self.w)?;
        } else {
            self.gen.deref(self.w)?;
        }
        Ok(())
    }

    fn member_selection(&mut self, ident: &str) -> CResult<()> {
        let ty = self.gen.stk_type();
        let sid = match self.w.type_(ty).kind {
            shn_runtime::types::TypeKind::State(sid) => sid,
            _ => return Err(self.lex.error("Invalid member selection")),
        };
        match self.w.find_symbol(sid, ident) {
            Some(Symbol::SelfVar(id)) => self.gen.load_member(self.w, id),
            Some(Symbol::Def(didx)) => {
                // A definition needs no object; the preceding load is
                // discarded.
                self.gen.undo_subexpr();
                self.gen.load_definition(self.w, sid, didx)
            }
            None => Err(CompileError::Unknown(ident.into())),
        }
    }

    fn atom(&mut self, hint: Option<TypeId>) -> CResult<()> {
        match self.lex.tok {
            Tok::IntVal => {
                let v = self.lex.int_val;
                // Small literals are byte-typed so sets built from them
                // can use the 256-bit bitset representation.
                let ty = if (0..=255).contains(&v) { self.w.def_byte } else { self.w.def_int };
                self.gen.load_const(self.w, ty, &Variant::Ord(v))?;
                self.lex.next()?;
            }
            Tok::StrVal => {
                let s = self.lex.str_val.clone();
                if s.len() == 1 {
                    let c = s.at(0).expect("one-byte string");
                    self.gen.load_const(self.w, self.w.def_char, &Variant::Ord(c as i64))?;
                } else {
                    self.w.register_string(self.module, s.clone());
                    self.gen.load_const(self.w, self.w.def_str, &Variant::Str(s))?;
                }
                self.lex.next()?;
            }
            Tok::Ident => {
                let ident = self.lex.text.clone();
                self.lex.next()?;
                self.identifier(&ident)?;
            }
            Tok::LParen => {
                self.lex.next()?;
                self.expression(hint)?;
                self.lex.expect(Tok::RParen, "')'")?;
            }
            Tok::LSquare => {
                self.lex.next()?;
                self.vector_ctor(hint)?;
            }
            Tok::LCurly => {
                self.lex.next()?;
                self.dict_ctor(hint)?;
            }
            Tok::KwIf => {
                self.lex.next()?;
                self.if_func()?;
            }
            Tok::KwTypeOf => {
                self.lex.next()?;
                self.type_of()?;
            }
            _ => return Err(self.lex.error("Expression syntax")),
        }
        Ok(())
    }

    /// Name lookup: block locals, then the module's own scope, then the
    /// system module.
    fn identifier(&mut self, ident: &str) -> CResult<()> {
        if let Some(local) = self.locals.iter().rev().find(|l| l.name == ident) {
            let (ty, offs) = (local.ty, local.offs);
            self.gen.load_stk_var(ty, offs);
            return Ok(());
        }
        if let Some(sym) = self.w.find_symbol(self.module, ident) {
            return self.load_symbol(self.module, sym);
        }
        let qb = self.w.queenbee;
        if let Some(sym) = self.w.find_symbol(qb, ident) {
            return self.load_symbol(qb, sym);
        }
        Err(CompileError::Unknown(ident.into()))
    }

    fn load_symbol(&mut self, sid: StateId, sym: Symbol) -> CResult<()> {
        match sym {
            Symbol::Def(didx) => self.gen.load_definition(self.w, sid, didx),
            Symbol::SelfVar(id) => {
                if sid != self.module {
                    // System-module variables (sio and friends) have no
                    // surface yet.
                    return Err(self.lex.error("Variable is not accessible here"));
                }
                self.gen.load_self_var(self.w, id);
                Ok(())
            }
        }
    }

    /// `[a, b, c]` or the empty container `[]`.
    fn vector_ctor(&mut self, hint: Option<TypeId>) -> CResult<()> {
        let elem_hint = hint.filter(|t| self.w.type_(*t).is_any_cont()).map(|t| self.w.elem_of(t));
        if self.lex.skip_if(Tok::RSquare)? {
            let t = hint.unwrap_or(self.w.def_nullcont);
            self.gen.load_empty_const(self.w, t);
            return Ok(());
        }
        self.expression(elem_hint)?;
        let vec_hint = hint.filter(|t| self.w.is_any_vec(*t));
        let cont = self.gen.elem_to_vec(self.w, vec_hint)?;
        let elem = self.w.elem_of(cont);
        while self.lex.skip_if(Tok::Comma)? {
            self.expression(Some(elem))?;
            self.gen.elem_cat(self.w)?;
        }
        self.lex.expect(Tok::RSquare, "']'")
    }

    /// `{k = v, ...}` dictionary, `{a, b..c}` set, or `{}`.
    fn dict_ctor(&mut self, hint: Option<TypeId>) -> CResult<()> {
        if self.lex.skip_if(Tok::RCurly)? {
            let t = hint.unwrap_or(self.w.def_nullcont);
            self.gen.load_empty_const(self.w, t);
            return Ok(());
        }
        let cont_hint = hint
            .filter(|t| self.w.is_any_set(*t) || self.w.is_any_dict(*t));
        let index_hint = cont_hint.map(|t| self.w.index_of(t));

        self.expression(index_hint)?;

        if self.lex.skip_if(Tok::Assign)? {
            // Dictionary
            let elem_hint = cont_hint.map(|t| self.w.elem_of(t));
            self.expression(elem_hint)?;
            let dict = self.gen.pair_to_dict(self.w)?;
            let (index, elem) = (self.w.index_of(dict), self.w.elem_of(dict));
            while self.lex.skip_if(Tok::Comma)? {
                self.expression(Some(index))?;
                self.gen.check_dict_key(self.w)?;
                self.lex.expect(Tok::Assign, "'='")?;
                self.expression(Some(elem))?;
                self.gen.dict_add_pair(self.w)?;
            }
        } else {
            // Set
            let set = if self.lex.skip_if(Tok::Range)? {
                self.expression(index_hint)?;
                self.gen.range_to_set(self.w)?
            } else {
                self.gen.elem_to_set(self.w)?
            };
            let index = self.w.index_of(set);
            while self.lex.skip_if(Tok::Comma)? {
                self.expression(Some(index))?;
                if self.lex.skip_if(Tok::Range)? {
                    self.gen.check_range_left(self.w)?;
                    self.expression(Some(index))?;
                    self.gen.set_add_range(self.w)?;
                } else {
                    self.gen.set_add_elem(self.w)?;
                }
            }
        }
        self.lex.expect(Tok::RCurly, "'}'")
    }

    /// `if(cond, then, else)` expression: two sub-expressions spliced
    /// around JumpFalse/Jump, stack levels matching at the join.
    fn if_func(&mut self) -> CResult<()> {
        self.lex.expect(Tok::LParen, "'('")?;
        self.expression(Some(self.w.def_bool))?;
        let jump_false = self.gen.bool_jump_forward(self.w, Op::JumpFalse)?;
        self.lex.expect(Tok::Comma, "','")?;
        self.expression(None)?;
        let ty = self.gen.stk_type();
        // The join gets its type from the second branch.
        self.gen.just_forget();
        let jump_out = self.gen.jump_forward(Op::Jump);
        self.gen.resolve_jump(jump_false)?;
        self.lex.expect(Tok::Comma, "','")?;
        self.expression(Some(ty))?;
        self.gen.resolve_jump(jump_out)?;
        self.lex.expect(Tok::RParen, "')'")
    }

    /// `typeof expr`: the expression is compiled for its type only, then
    /// discarded.
    fn type_of(&mut self) -> CResult<()> {
        self.designator(None)?;
        let ty = self.gen.stk_type();
        self.gen.undo_subexpr();
        self.gen.load_typeref_const(self.w, ty);
        Ok(())
    }
}

fn cmp_op(tok: Tok) -> Option<Op> {
    Some(match tok {
        Tok::Equal => Op::Equal,
        Tok::NotEq => Op::NotEq,
        Tok::LessThan => Op::LessThan,
        Tok::LessEq => Op::LessEq,
        Tok::GreaterThan => Op::GreaterThan,
        Tok::GreaterEq => Op::GreaterEq,
        _ => return None,
    })
}
