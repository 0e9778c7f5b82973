//! IR builder
//!
//! Creates typed instructions at an insertion point, so frontends and passes
//! don't need to know operand layouts.

use super::{
    BinaryOp, BlockId, DefinitionKind, FunctionId, InstId, InstKind, Module, ParamId, ScopeId,
    Type, UnaryOp, Value, VariableId,
};
use crate::diagnostics::SourceLoc;

/// Where new instructions go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionPoint {
    /// Append to a block
    End(BlockId),
    /// Insert before an instruction
    Before(InstId),
}

/// Builder over a module
pub struct IRBuilder<'m> {
    module: &'m mut Module,
    point: Option<InsertionPoint>,
    location: SourceLoc,
}

impl<'m> IRBuilder<'m> {
    /// Builder without an insertion point
    pub fn new(module: &'m mut Module) -> Self {
        Self {
            module,
            point: None,
            location: SourceLoc::default(),
        }
    }

    /// The module being built
    pub fn module(&mut self) -> &mut Module {
        &mut *self.module
    }

    /// Create a function
    pub fn create_function(
        &mut self,
        name: &str,
        kind: DefinitionKind,
        strict: bool,
    ) -> FunctionId {
        self.module.add_function(name, kind, strict)
    }

    /// Create a block at the end of `function`
    pub fn create_block(&mut self, function: FunctionId) -> BlockId {
        self.module.add_block(function)
    }

    /// Append to `block` from now on
    pub fn set_insertion_block(&mut self, block: BlockId) {
        self.point = Some(InsertionPoint::End(block));
    }

    /// Insert before `inst` from now on
    pub fn set_insertion_point(&mut self, inst: InstId) {
        self.point = Some(InsertionPoint::Before(inst));
    }

    /// Current insertion point
    pub fn insertion_point(&self) -> Option<InsertionPoint> {
        self.point
    }

    /// Block instructions are inserted into
    pub fn insertion_block(&self) -> Option<BlockId> {
        match self.point? {
            InsertionPoint::End(b) => Some(b),
            InsertionPoint::Before(i) => self.module.inst(i).parent(),
        }
    }

    /// Attach `loc` to the following instructions
    pub fn set_location(&mut self, loc: SourceLoc) {
        self.location = loc;
    }

    fn insert(&mut self, kind: InstKind, operands: Vec<Value>, ty: Type) -> InstId {
        let inst = self.module.create_inst(kind, operands, ty);
        self.module.inst_mut(inst).location = self.location;
        match self.point {
            Some(InsertionPoint::End(block)) => self.module.insert_at_end(block, inst),
            Some(InsertionPoint::Before(before)) => self.module.insert_before(before, inst),
            None => panic!("IRBuilder used without an insertion point"),
        }
        inst
    }

    /// Number literal
    pub fn number(&mut self, n: f64) -> Value {
        self.module.number(n)
    }

    /// String literal
    pub fn string(&mut self, s: &str) -> Value {
        self.module.string(s)
    }

    /// BigInt literal
    pub fn bigint(&mut self, digits: &str) -> Value {
        self.module.bigint(digits)
    }

    /// Boolean literal
    pub fn boolean(&mut self, b: bool) -> Value {
        self.module.boolean(b)
    }

    /// `undefined`
    pub fn undefined(&mut self) -> Value {
        self.module.undefined()
    }

    /// `null`
    pub fn null(&mut self) -> Value {
        self.module.null()
    }

    /// TDZ marker
    pub fn empty(&mut self) -> Value {
        self.module.empty()
    }

    // ==================== Values ====================

    /// Phi over `(value, predecessor)` entries
    pub fn create_phi(&mut self, entries: &[(Value, BlockId)]) -> InstId {
        let mut operands = Vec::with_capacity(entries.len() * 2);
        let mut ty = Type::empty();
        for (value, block) in entries {
            operands.push(*value);
            operands.push(Value::Block(*block));
            ty |= self.module.value_type(*value);
        }
        self.insert(InstKind::Phi, operands, ty)
    }

    /// Binary operator
    pub fn create_binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> InstId {
        let ty = if op.is_comparison() {
            Type::BOOLEAN
        } else {
            match op {
                BinaryOp::Add => {
                    let l = self.module.value_type(lhs);
                    let r = self.module.value_type(rhs);
                    if l == Type::NUMBER && r == Type::NUMBER {
                        Type::NUMBER
                    } else if l == Type::STRING || r == Type::STRING {
                        Type::STRING
                    } else {
                        Type::NUMBER | Type::STRING | Type::BIGINT
                    }
                }
                BinaryOp::UShr => Type::NUMBER,
                _ => Type::NUMBER | Type::BIGINT,
            }
        };
        self.insert(InstKind::BinaryOperator(op), vec![lhs, rhs], ty)
    }

    /// Unary operator
    pub fn create_unary(&mut self, op: UnaryOp, operand: Value) -> InstId {
        let ty = match op {
            UnaryOp::Not => Type::BOOLEAN,
            UnaryOp::TypeOf => Type::STRING,
            UnaryOp::Void => Type::UNDEFINED,
            _ => Type::NUMBER | Type::BIGINT,
        };
        self.insert(InstKind::UnaryOperator(op), vec![operand], ty)
    }

    /// Explicit literal load
    pub fn create_load_const(&mut self, literal: Value) -> InstId {
        let ty = self.module.value_type(literal);
        self.insert(InstKind::LoadConst, vec![literal], ty)
    }

    /// Load the global object
    pub fn create_get_global_object(&mut self) -> InstId {
        self.insert(InstKind::GetGlobalObject, vec![], Type::OBJECT)
    }

    /// Load a parameter
    pub fn create_load_param(&mut self, param: ParamId) -> InstId {
        self.insert(InstKind::LoadParam, vec![Value::Param(param)], Type::ANY)
    }

    // ==================== Storage ====================

    /// Stack slot named `name`
    pub fn create_alloc_stack(&mut self, name: &str) -> InstId {
        let name = self.module.string(name);
        self.insert(InstKind::AllocStack, vec![name], Type::empty())
    }

    /// Read a stack slot
    pub fn create_load_stack(&mut self, slot: InstId) -> InstId {
        self.insert(InstKind::LoadStack, vec![Value::Inst(slot)], Type::ANY)
    }

    /// Write a stack slot
    pub fn create_store_stack(&mut self, value: Value, slot: InstId) -> InstId {
        self.insert(
            InstKind::StoreStack,
            vec![value, Value::Inst(slot)],
            Type::empty(),
        )
    }

    /// Create an instance of `scope` whose parent is `parent`, or a top
    /// level instance
    pub fn create_scope(&mut self, scope: ScopeId, parent: Option<Value>) -> InstId {
        let parent = match parent {
            Some(p) => p,
            None => self.module.empty(),
        };
        self.insert(
            InstKind::CreateScope,
            vec![Value::Scope(scope), parent],
            Type::ENVIRONMENT,
        )
    }

    /// Scope instance the current closure was created in
    pub fn create_get_parent_scope(&mut self, scope: ScopeId) -> InstId {
        self.insert(
            InstKind::GetParentScope,
            vec![Value::Scope(scope)],
            Type::ENVIRONMENT,
        )
    }

    /// Walk `levels` parents up from `start`
    pub fn create_resolve_scope(&mut self, scope: ScopeId, start: Value, levels: u32) -> InstId {
        let levels = self.module.number(levels as f64);
        self.insert(
            InstKind::ResolveScope,
            vec![Value::Scope(scope), start, levels],
            Type::ENVIRONMENT,
        )
    }

    /// Read a frame variable
    pub fn create_load_frame(&mut self, scope: Value, var: VariableId) -> InstId {
        let ty = if self.module.variable(var).obeys_tdz {
            Type::ANY | Type::EMPTY
        } else {
            Type::ANY
        };
        self.insert(InstKind::LoadFrame, vec![scope, Value::Variable(var)], ty)
    }

    /// Write a frame variable
    pub fn create_store_frame(&mut self, scope: Value, value: Value, var: VariableId) -> InstId {
        self.insert(
            InstKind::StoreFrame,
            vec![scope, value, Value::Variable(var)],
            Type::empty(),
        )
    }

    // ==================== Objects ====================

    /// `obj[prop]`
    pub fn create_load_property(&mut self, obj: Value, prop: Value) -> InstId {
        self.insert(InstKind::LoadProperty, vec![obj, prop], Type::ANY)
    }

    /// Global lookup that throws when the name is missing
    pub fn create_try_load_global_property(&mut self, name: &str) -> InstId {
        let global = self.module.global_object();
        let name = self.module.string(name);
        self.insert(
            InstKind::TryLoadGlobalProperty,
            vec![global, name],
            Type::ANY,
        )
    }

    /// `obj[prop] = value`
    pub fn create_store_property(&mut self, value: Value, obj: Value, prop: Value) -> InstId {
        self.insert(
            InstKind::StoreProperty,
            vec![value, obj, prop],
            Type::empty(),
        )
    }

    /// Define an own property
    pub fn create_define_own_property(
        &mut self,
        value: Value,
        obj: Value,
        prop: Value,
        enumerable: bool,
    ) -> InstId {
        let enumerable = self.module.boolean(enumerable);
        self.insert(
            InstKind::DefineOwnProperty,
            vec![value, obj, prop, enumerable],
            Type::empty(),
        )
    }

    /// `delete obj[prop]`
    pub fn create_delete_property(&mut self, obj: Value, prop: Value) -> InstId {
        self.insert(InstKind::DeleteProperty, vec![obj, prop], Type::BOOLEAN)
    }

    /// Empty object
    pub fn create_alloc_object(&mut self, size_hint: u32) -> InstId {
        let size = self.module.number(size_hint as f64);
        self.insert(InstKind::AllocObject, vec![size], Type::OBJECT)
    }

    /// Object literal with the given properties
    pub fn create_alloc_object_literal(&mut self, props: &[(Value, Value)]) -> InstId {
        let operands = props.iter().flat_map(|(k, v)| [*k, *v]).collect();
        self.insert(InstKind::AllocObjectLiteral, operands, Type::OBJECT)
    }

    /// Array literal
    pub fn create_alloc_array(&mut self, size_hint: u32, elements: &[Value]) -> InstId {
        let mut operands = vec![self.module.number(size_hint as f64)];
        operands.extend_from_slice(elements);
        self.insert(InstKind::AllocArray, operands, Type::OBJECT)
    }

    /// Regular expression literal
    pub fn create_regexp(&mut self, pattern: &str, flags: &str) -> InstId {
        let pattern = self.module.string(pattern);
        let flags = self.module.string(flags);
        self.insert(InstKind::CreateRegExp, vec![pattern, flags], Type::OBJECT)
    }

    // ==================== Calls ====================

    /// Closure over `function` capturing `scope`
    pub fn create_function_closure(&mut self, function: FunctionId, scope: Value) -> InstId {
        self.insert(
            InstKind::CreateFunction,
            vec![Value::Function(function), scope],
            Type::OBJECT,
        )
    }

    /// Call
    pub fn create_call(&mut self, callee: Value, this: Value, args: &[Value]) -> InstId {
        let mut operands = vec![callee, this];
        operands.extend_from_slice(args);
        self.insert(InstKind::Call, operands, Type::ANY)
    }

    /// `new callee(args)`
    pub fn create_construct(&mut self, callee: Value, this: Value, args: &[Value]) -> InstId {
        let mut operands = vec![callee, this];
        operands.extend_from_slice(args);
        self.insert(InstKind::Construct, operands, Type::OBJECT)
    }

    /// Direct eval of `text`
    pub fn create_direct_eval(&mut self, text: Value, strict: bool) -> InstId {
        let strict = self.module.boolean(strict);
        self.insert(InstKind::DirectEval, vec![text, strict], Type::ANY)
    }

    /// TDZ check
    pub fn create_throw_if_empty(&mut self, value: Value) -> InstId {
        let ty = self.module.value_type(value) - Type::EMPTY;
        self.insert(InstKind::ThrowIfEmpty, vec![value], ty)
    }

    /// Cast trusted to narrow the type of `value`
    pub fn create_union_narrow_trusted(&mut self, value: Value, ty: Type) -> InstId {
        self.insert(InstKind::UnionNarrowTrusted, vec![value], ty)
    }

    /// Generator prologue
    pub fn create_start_generator(&mut self) -> InstId {
        self.insert(InstKind::StartGenerator, vec![], Type::empty())
    }

    /// Bind the exception being handled
    pub fn create_catch(&mut self) -> InstId {
        self.insert(InstKind::Catch, vec![], Type::ANY)
    }

    // ==================== Terminators ====================

    /// Unconditional branch
    pub fn create_branch(&mut self, dest: BlockId) -> InstId {
        self.insert(InstKind::Branch, vec![Value::Block(dest)], Type::empty())
    }

    /// Two-way branch
    pub fn create_cond_branch(&mut self, cond: Value, t: BlockId, f: BlockId) -> InstId {
        self.insert(
            InstKind::CondBranch,
            vec![cond, Value::Block(t), Value::Block(f)],
            Type::empty(),
        )
    }

    /// Multi-way branch on literal case values
    pub fn create_switch(
        &mut self,
        input: Value,
        default: BlockId,
        cases: &[(Value, BlockId)],
    ) -> InstId {
        let mut operands = vec![input, Value::Block(default)];
        for (value, dest) in cases {
            operands.push(*value);
            operands.push(Value::Block(*dest));
        }
        self.insert(InstKind::Switch, operands, Type::empty())
    }

    /// Return
    pub fn create_return(&mut self, value: Value) -> InstId {
        self.insert(InstKind::Return, vec![value], Type::empty())
    }

    /// Throw, optionally naming the catch block of the enclosing try
    pub fn create_throw(&mut self, value: Value, catch: Option<BlockId>) -> InstId {
        let mut operands = vec![value];
        if let Some(c) = catch {
            operands.push(Value::Block(c));
        }
        self.insert(InstKind::Throw, operands, Type::empty())
    }

    /// Enter a try region
    pub fn create_try_start(&mut self, body: BlockId, catch: BlockId) -> InstId {
        self.insert(
            InstKind::TryStart,
            vec![Value::Block(body), Value::Block(catch)],
            Type::empty(),
        )
    }

    /// Leave the innermost try region
    pub fn create_try_end(&mut self, dest: BlockId) -> InstId {
        self.insert(InstKind::TryEnd, vec![Value::Block(dest)], Type::empty())
    }

    /// Unreachable
    pub fn create_unreachable(&mut self) -> InstId {
        self.insert(InstKind::Unreachable, vec![], Type::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_follow_operands() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::Normal, false);
        let scope = m.add_scope(f, None);
        let var = m.add_variable(scope, "x", true);
        let mut b = IRBuilder::new(&mut m);
        let bb = b.create_block(f);
        b.set_insertion_block(bb);
        let env = b.create_scope(scope, None);
        let load = b.create_load_frame(Value::Inst(env), var);
        let check = b.create_throw_if_empty(Value::Inst(load));
        let one = b.number(1.0);
        let two = b.number(2.0);
        let sum = b.create_binary(BinaryOp::Add, one, two);
        let cmp = b.create_binary(BinaryOp::Less, one, two);
        b.create_return(Value::Inst(check));

        assert!(m.inst(load).ty.can_be_empty());
        assert!(!m.inst(check).ty.can_be_empty());
        assert_eq!(m.inst(sum).ty, Type::NUMBER);
        assert_eq!(m.inst(cmp).ty, Type::BOOLEAN);
        assert_eq!(m.inst(env).ty, Type::ENVIRONMENT);
        assert_eq!(m.block_insts(bb).len(), 6);
    }

    #[test]
    fn test_insert_before() {
        let mut m = Module::new();
        let f = m.add_function("f", DefinitionKind::Normal, false);
        let mut b = IRBuilder::new(&mut m);
        let bb = b.create_block(f);
        b.set_insertion_block(bb);
        let u = b.undefined();
        let ret = b.create_return(u);
        b.set_insertion_point(ret);
        let g = b.create_get_global_object();
        assert_eq!(m.block_insts(bb), &[g, ret]);
    }
}
