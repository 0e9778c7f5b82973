//! Intermediate representation
//!
//! A [`Module`] owns every function, block, instruction and variable in
//! arenas indexed by small copyable ids. Operands are [`Value`]s; the module
//! keeps, for every value, the list of instructions using it, so passes can
//! rewrite uses without walking the whole function.
//!
//! Erased entities leave a hole in their arena. Ids are never reused within a
//! module.

pub mod builder;
pub mod eval;
pub mod printer;
pub mod verify;

use std::hash::{Hash, Hasher};

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::diagnostics::SourceLoc;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// Arena index
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

define_id!(
    /// Function id
    FunctionId
);
define_id!(
    /// Basic block id
    BlockId
);
define_id!(
    /// Instruction id
    InstId
);
define_id!(
    /// Uniqued literal id
    LiteralId
);
define_id!(
    /// Variable id
    VariableId
);
define_id!(
    /// Variable scope id
    ScopeId
);
define_id!(
    /// Parameter id
    ParamId
);

/// An operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// Uniqued literal
    Literal(LiteralId),
    /// Result of an instruction
    Inst(InstId),
    /// A basic block, as a branch target or phi incoming edge
    Block(BlockId),
    /// A function parameter
    Param(ParamId),
    /// A function, for closure creation
    Function(FunctionId),
    /// A frame variable
    Variable(VariableId),
    /// A variable scope descriptor
    Scope(ScopeId),
}

impl Value {
    /// Instruction id if this is an instruction result
    pub fn as_inst(self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(id),
            _ => None,
        }
    }

    /// Block id if this is a block
    pub fn as_block(self) -> Option<BlockId> {
        match self {
            Value::Block(id) => Some(id),
            _ => None,
        }
    }

    /// Literal id if this is a literal
    pub fn as_literal(self) -> Option<LiteralId> {
        match self {
            Value::Literal(id) => Some(id),
            _ => None,
        }
    }
}

/// Literal value
#[derive(Debug, Clone)]
pub enum Literal {
    /// A number
    Number(f64),
    /// A string
    String(String),
    /// A bigint, decimal digits
    BigInt(String),
    /// true / false
    Bool(bool),
    /// null
    Null,
    /// undefined
    Undefined,
    /// The TDZ marker of an uninitialized binding
    Empty,
    /// The global object
    GlobalObject,
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Number(a), Literal::Number(b)) => a.to_bits() == b.to_bits(),
            (Literal::String(a), Literal::String(b)) => a == b,
            (Literal::BigInt(a), Literal::BigInt(b)) => a == b,
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::Null, Literal::Null)
            | (Literal::Undefined, Literal::Undefined)
            | (Literal::Empty, Literal::Empty)
            | (Literal::GlobalObject, Literal::GlobalObject) => true,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Literal::Number(n) => n.to_bits().hash(state),
            Literal::String(s) | Literal::BigInt(s) => s.hash(state),
            Literal::Bool(b) => b.hash(state),
            _ => {}
        }
    }
}

impl Literal {
    /// Static type of the literal
    pub fn ty(&self) -> Type {
        match self {
            Literal::Number(_) => Type::NUMBER,
            Literal::String(_) => Type::STRING,
            Literal::BigInt(_) => Type::BIGINT,
            Literal::Bool(_) => Type::BOOLEAN,
            Literal::Null => Type::NULL,
            Literal::Undefined => Type::UNDEFINED,
            Literal::Empty => Type::EMPTY,
            Literal::GlobalObject => Type::OBJECT,
        }
    }

    /// Number payload
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Is this a number usable as an array index
    pub fn as_array_index(&self) -> Option<u32> {
        match self {
            Literal::Number(n)
                if n.fract() == 0.0
                    && *n >= 0.0
                    && *n < u32::MAX as f64
                    && !(*n == 0.0 && n.is_sign_negative()) =>
            {
                Some(*n as u32)
            }
            _ => None,
        }
    }
}

bitflags! {
    /// Set of runtime types a value may have
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Type: u16 {
        /// TDZ marker
        const EMPTY = 1 << 0;
        /// undefined
        const UNDEFINED = 1 << 1;
        /// null
        const NULL = 1 << 2;
        /// boolean
        const BOOLEAN = 1 << 3;
        /// string
        const STRING = 1 << 4;
        /// number
        const NUMBER = 1 << 5;
        /// bigint
        const BIGINT = 1 << 6;
        /// object
        const OBJECT = 1 << 7;
        /// scope instance
        const ENVIRONMENT = 1 << 8;
        /// Any primitive
        const PRIMITIVE = Self::UNDEFINED.bits()
            | Self::NULL.bits()
            | Self::BOOLEAN.bits()
            | Self::STRING.bits()
            | Self::NUMBER.bits()
            | Self::BIGINT.bits();
        /// Any language value
        const ANY = Self::PRIMITIVE.bits() | Self::OBJECT.bits();
    }
}

impl Type {
    /// Are all possible values primitives
    pub fn is_primitive(self) -> bool {
        !self.is_empty() && Type::PRIMITIVE.contains(self)
    }

    /// May the value be the TDZ marker
    pub fn can_be_empty(self) -> bool {
        self.contains(Type::EMPTY)
    }
}

bitflags! {
    /// Facts known about a function
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct FunctionAttributes: u8 {
        /// No side effects
        const PURE = 1 << 0;
        /// Never returns normally
        const NO_RETURN = 1 << 1;
        /// Never called
        const UNREACHABLE = 1 << 2;
        /// Every call site is known to the compiler
        const ALL_CALLSITES_KNOWN = 1 << 3;
    }
}

/// How a function was defined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    /// Global code of a module or eval
    TopLevel,
    /// Ordinary function
    Normal,
    /// Arrow function
    Arrow,
    /// Body of a generator, split off its outer function
    GeneratorInner,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
}

impl BinaryOp {
    /// Does the operator always produce a boolean
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::StrictEq
                | BinaryOp::StrictNotEq
                | BinaryOp::Less
                | BinaryOp::LessEq
                | BinaryOp::Greater
                | BinaryOp::GreaterEq
        )
    }

    /// Source spelling
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNotEq => "!==",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum UnaryOp {
    Minus,
    Not,
    BitNot,
    TypeOf,
    Void,
    Inc,
    Dec,
}

impl UnaryOp {
    /// Source spelling
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Minus => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::TypeOf => "typeof",
            UnaryOp::Void => "void",
            UnaryOp::Inc => "++",
            UnaryOp::Dec => "--",
        }
    }
}

/// Instruction kinds
///
/// Operand layouts, in order:
///
/// | kind | operands |
/// |---|---|
/// | `Phi` | value, block, value, block, ... |
/// | `BinaryOperator` | lhs, rhs |
/// | `UnaryOperator` | operand |
/// | `LoadConst` | literal |
/// | `LoadParam` | param |
/// | `AllocStack` | name literal |
/// | `LoadStack` | stack slot |
/// | `StoreStack` | value, stack slot |
/// | `CreateScope` | scope, parent instance or literal empty |
/// | `GetParentScope` | scope |
/// | `ResolveScope` | scope, start instance, levels literal |
/// | `LoadFrame` | scope instance, variable |
/// | `StoreFrame` | scope instance, value, variable |
/// | `LoadProperty` | object, property |
/// | `TryLoadGlobalProperty` | global object, name |
/// | `StoreProperty` | value, object, property |
/// | `DefineOwnProperty` | value, object, property, enumerable |
/// | `DeleteProperty` | object, property |
/// | `AllocObject` | size hint |
/// | `AllocObjectLiteral` | key, value, key, value, ... |
/// | `AllocArray` | size hint, elements... |
/// | `CreateRegExp` | pattern, flags |
/// | `CreateFunction` | function, scope instance |
/// | `Call` / `Construct` | callee, this, args... |
/// | `DirectEval` | text, strict |
/// | `ThrowIfEmpty` / `UnionNarrowTrusted` | value |
/// | `Branch` | destination |
/// | `CondBranch` | condition, true block, false block |
/// | `Switch` | input, default block, case, block, case, block, ... |
/// | `Return` | value |
/// | `Throw` | value, optional catch block |
/// | `TryStart` | body block, catch block |
/// | `TryEnd` | destination |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum InstKind {
    Phi,
    BinaryOperator(BinaryOp),
    UnaryOperator(UnaryOp),
    LoadConst,
    GetGlobalObject,
    LoadParam,
    AllocStack,
    LoadStack,
    StoreStack,
    CreateScope,
    GetParentScope,
    ResolveScope,
    LoadFrame,
    StoreFrame,
    LoadProperty,
    TryLoadGlobalProperty,
    StoreProperty,
    DefineOwnProperty,
    DeleteProperty,
    AllocObject,
    AllocObjectLiteral,
    AllocArray,
    CreateRegExp,
    CreateFunction,
    Call,
    Construct,
    DirectEval,
    ThrowIfEmpty,
    UnionNarrowTrusted,
    StartGenerator,
    Catch,
    Branch,
    CondBranch,
    Switch,
    Return,
    Throw,
    TryStart,
    TryEnd,
    Unreachable,
}

impl InstKind {
    /// Must this be the last instruction of a block
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            InstKind::Branch
                | InstKind::CondBranch
                | InstKind::Switch
                | InstKind::Return
                | InstKind::Throw
                | InstKind::TryStart
                | InstKind::TryEnd
                | InstKind::Unreachable
        )
    }

    /// May the instruction be deleted when its result is unused.
    ///
    /// Operators are only free of side effects on primitive operands, which
    /// the caller checks. `CreateRegExp` relies on the [`Frontend`] contract
    /// that every pattern and flag string reaching the IR is valid, so it
    /// cannot throw.
    ///
    /// [`Frontend`]: crate::frontend::Frontend
    pub fn is_side_effect_free(self) -> bool {
        matches!(
            self,
            InstKind::Phi
                | InstKind::LoadConst
                | InstKind::GetGlobalObject
                | InstKind::LoadParam
                | InstKind::AllocStack
                | InstKind::LoadStack
                | InstKind::CreateScope
                | InstKind::GetParentScope
                | InstKind::ResolveScope
                | InstKind::LoadFrame
                | InstKind::AllocObject
                | InstKind::AllocObjectLiteral
                | InstKind::AllocArray
                | InstKind::CreateRegExp
                | InstKind::CreateFunction
                | InstKind::UnionNarrowTrusted
        )
    }

    /// Name used by the printer
    pub fn name(self) -> &'static str {
        match self {
            InstKind::Phi => "Phi",
            InstKind::BinaryOperator(_) => "BinaryOperator",
            InstKind::UnaryOperator(_) => "UnaryOperator",
            InstKind::LoadConst => "LoadConst",
            InstKind::GetGlobalObject => "GetGlobalObject",
            InstKind::LoadParam => "LoadParam",
            InstKind::AllocStack => "AllocStack",
            InstKind::LoadStack => "LoadStack",
            InstKind::StoreStack => "StoreStack",
            InstKind::CreateScope => "CreateScope",
            InstKind::GetParentScope => "GetParentScope",
            InstKind::ResolveScope => "ResolveScope",
            InstKind::LoadFrame => "LoadFrame",
            InstKind::StoreFrame => "StoreFrame",
            InstKind::LoadProperty => "LoadProperty",
            InstKind::TryLoadGlobalProperty => "TryLoadGlobalProperty",
            InstKind::StoreProperty => "StoreProperty",
            InstKind::DefineOwnProperty => "DefineOwnProperty",
            InstKind::DeleteProperty => "DeleteProperty",
            InstKind::AllocObject => "AllocObject",
            InstKind::AllocObjectLiteral => "AllocObjectLiteral",
            InstKind::AllocArray => "AllocArray",
            InstKind::CreateRegExp => "CreateRegExp",
            InstKind::CreateFunction => "CreateFunction",
            InstKind::Call => "Call",
            InstKind::Construct => "Construct",
            InstKind::DirectEval => "DirectEval",
            InstKind::ThrowIfEmpty => "ThrowIfEmpty",
            InstKind::UnionNarrowTrusted => "UnionNarrowTrusted",
            InstKind::StartGenerator => "StartGenerator",
            InstKind::Catch => "Catch",
            InstKind::Branch => "Branch",
            InstKind::CondBranch => "CondBranch",
            InstKind::Switch => "Switch",
            InstKind::Return => "Return",
            InstKind::Throw => "Throw",
            InstKind::TryStart => "TryStart",
            InstKind::TryEnd => "TryEnd",
            InstKind::Unreachable => "Unreachable",
        }
    }
}

/// An instruction
#[derive(Debug, Clone)]
pub struct Instruction {
    /// Kind
    pub kind: InstKind,
    operands: Vec<Value>,
    /// Result type
    pub ty: Type,
    parent: Option<BlockId>,
    /// Source position, for debug info
    pub location: SourceLoc,
}

impl Instruction {
    /// Operands
    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    /// Operand at `index`
    pub fn operand(&self, index: usize) -> Value {
        self.operands[index]
    }

    /// Number of operands
    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }

    /// Block the instruction lives in
    pub fn parent(&self) -> Option<BlockId> {
        self.parent
    }
}

/// A basic block
#[derive(Debug, Clone)]
pub struct BasicBlock {
    parent: FunctionId,
    insts: Vec<InstId>,
}

impl BasicBlock {
    /// Owning function
    pub fn parent(&self) -> FunctionId {
        self.parent
    }

    /// Instructions in order
    pub fn insts(&self) -> &[InstId] {
        &self.insts
    }
}

/// A function
#[derive(Debug, Clone)]
pub struct Function {
    /// Name
    pub name: String,
    /// Definition kind
    pub kind: DefinitionKind,
    /// Attributes
    pub attributes: FunctionAttributes,
    /// Strict mode
    pub strict: bool,
    /// Scope descriptor of the enclosing function's environment
    pub parent_scope: Option<ScopeId>,
    /// Source position of the definition
    pub location: SourceLoc,
    blocks: Vec<BlockId>,
    params: Vec<ParamId>,
}

impl Function {
    /// Blocks in layout order, entry first
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Entry block
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }

    /// Parameters, `this` first
    pub fn params(&self) -> &[ParamId] {
        &self.params
    }
}

/// A parameter
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Name
    pub name: String,
    /// Owning function
    pub parent: FunctionId,
    /// Position, `this` is 0
    pub index: u32,
}

/// A variable living in a scope instance
#[derive(Debug, Clone)]
pub struct Variable {
    /// Name
    pub name: String,
    /// Declaring scope
    pub scope: ScopeId,
    /// Reads before the first write must throw
    pub obeys_tdz: bool,
    /// Slot in the scope instance
    pub index: u32,
}

/// Group of variables sharing one scope instance
#[derive(Debug, Clone)]
pub struct VariableScope {
    /// Function creating instances of this scope
    pub function: FunctionId,
    /// Lexically enclosing scope
    pub parent: Option<ScopeId>,
    variables: Vec<VariableId>,
}

impl VariableScope {
    /// Live variables
    pub fn variables(&self) -> &[VariableId] {
        &self.variables
    }
}

/// A compilation unit
#[derive(Debug, Default)]
pub struct Module {
    functions: Vec<Option<Function>>,
    blocks: Vec<Option<BasicBlock>>,
    insts: Vec<Option<Instruction>>,
    literals: Vec<Literal>,
    literal_ids: FxHashMap<Literal, LiteralId>,
    params: Vec<Parameter>,
    scopes: Vec<VariableScope>,
    variables: Vec<Option<Variable>>,
    users: FxHashMap<Value, Vec<InstId>>,
    function_order: Vec<FunctionId>,
    top_level: Option<FunctionId>,
    /// Generator functions were already split into state machines
    pub generators_lowered: bool,
}

impl Module {
    /// Empty module
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Functions ====================

    /// Add a function with its `this` parameter
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        kind: DefinitionKind,
        strict: bool,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(Some(Function {
            name: name.into(),
            kind,
            attributes: FunctionAttributes::empty(),
            strict,
            parent_scope: None,
            location: SourceLoc::default(),
            blocks: Vec::new(),
            params: Vec::new(),
        }));
        self.function_order.push(id);
        self.add_param(id, "this");
        if kind == DefinitionKind::TopLevel && self.top_level.is_none() {
            self.top_level = Some(id);
        }
        id
    }

    /// Function by id
    pub fn function(&self, id: FunctionId) -> &Function {
        self.functions[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("use of erased function {:?}", id))
    }

    /// Mutable function by id
    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        self.functions[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("use of erased function {:?}", id))
    }

    /// Live functions in definition order
    pub fn functions(&self) -> Vec<FunctionId> {
        self.function_order.clone()
    }

    /// Number of live functions
    pub fn num_functions(&self) -> usize {
        self.function_order.len()
    }

    /// The global code function
    pub fn top_level(&self) -> Option<FunctionId> {
        self.top_level
    }

    /// Make `id` the global code function
    pub fn set_top_level(&mut self, id: FunctionId) {
        self.top_level = Some(id);
    }

    /// Erase a function, its blocks and its parameters.
    ///
    /// The function must not be referenced.
    pub fn erase_function(&mut self, id: FunctionId) {
        assert!(
            !self.has_users(Value::Function(id)),
            "erasing referenced function {:?}",
            id
        );
        let blocks = self.function(id).blocks.clone();
        self.erase_blocks(&blocks);
        self.function_order.retain(|f| *f != id);
        if self.top_level == Some(id) {
            self.top_level = None;
        }
        self.functions[id.index()] = None;
    }

    // ==================== Blocks ====================

    /// Append a new empty block to `function`
    pub fn add_block(&mut self, function: FunctionId) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(BasicBlock {
            parent: function,
            insts: Vec::new(),
        }));
        self.function_mut(function).blocks.push(id);
        id
    }

    /// Block by id
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("use of erased block {:?}", id))
    }

    fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        self.blocks[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("use of erased block {:?}", id))
    }

    /// Is the block still alive
    pub fn is_block_alive(&self, id: BlockId) -> bool {
        self.blocks.get(id.index()).is_some_and(|b| b.is_some())
    }

    /// Instructions of a block
    pub fn block_insts(&self, id: BlockId) -> &[InstId] {
        &self.block(id).insts
    }

    /// Last instruction of a block if it is a terminator
    pub fn terminator(&self, id: BlockId) -> Option<InstId> {
        let last = *self.block(id).insts.last()?;
        self.inst(last).kind.is_terminator().then_some(last)
    }

    /// First instruction of a block
    pub fn first_inst(&self, id: BlockId) -> Option<InstId> {
        self.block(id).insts.first().copied()
    }

    /// Does the block start with `Catch`
    pub fn is_catch_block(&self, id: BlockId) -> bool {
        self.first_inst(id)
            .is_some_and(|i| self.inst(i).kind == InstKind::Catch)
    }

    /// Successors in terminator operand order, without duplicates
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        if let Some(term) = self.terminator(id) {
            for op in self.inst(term).operands() {
                if let Value::Block(b) = op
                    && !out.contains(b)
                {
                    out.push(*b);
                }
            }
        }
        out
    }

    /// Predecessors in the order their edges were created, without duplicates
    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        for user in self.users(Value::Block(id)) {
            let inst = self.inst(user);
            if !inst.kind.is_terminator() {
                continue;
            }
            if let Some(parent) = inst.parent
                && !out.contains(&parent)
            {
                out.push(parent);
            }
        }
        out
    }

    /// Erase a block and everything in it.
    pub fn erase_block(&mut self, id: BlockId) {
        self.erase_blocks(&[id]);
    }

    /// Erase a set of blocks.
    ///
    /// Uses of the erased instructions outside the set become `undefined`.
    /// Phi entries naming an erased block are removed.
    pub fn erase_blocks(&mut self, ids: &[BlockId]) {
        let insts: Vec<InstId> = ids
            .iter()
            .flat_map(|b| self.block(*b).insts.clone())
            .collect();
        for inst in &insts {
            self.drop_operands(*inst);
        }
        let undefined = self.undefined();
        for inst in &insts {
            self.replace_all_uses(Value::Inst(*inst), undefined);
        }
        for block in ids {
            for user in self.users(Value::Block(*block)) {
                if self.inst(user).kind == InstKind::Phi {
                    self.phi_remove_entries_from(user, *block);
                }
            }
            assert!(
                !self.has_users(Value::Block(*block)),
                "erasing block {:?} still targeted by a live terminator",
                block
            );
        }
        for inst in &insts {
            self.insts[inst.index()] = None;
        }
        for block in ids {
            let parent = self.block(*block).parent;
            self.function_mut(parent).blocks.retain(|b| b != block);
            self.blocks[block.index()] = None;
        }
    }

    /// Move the instructions from `before` to the end of its block into a new
    /// block, and branch to it. Successor phis are updated.
    pub fn split_block(&mut self, before: InstId) -> BlockId {
        let old = self.parent_block(before);
        let function = self.block(old).parent;
        let new = self.add_block(function);
        let pos = self.position(before);
        let moved: Vec<InstId> = self.block_mut(old).insts.split_off(pos);
        for inst in &moved {
            self.inst_mut(*inst).parent = Some(new);
        }
        self.block_mut(new).insts = moved;

        for succ in self.successors(new) {
            for phi in self.phis(succ) {
                let n = self.inst(phi).num_operands();
                for i in (1..n).step_by(2) {
                    if self.inst(phi).operand(i) == Value::Block(old) {
                        self.set_operand(phi, i, Value::Block(new));
                    }
                }
            }
        }
        let branch = self.create_inst(InstKind::Branch, vec![Value::Block(new)], Type::empty());
        self.insert_at_end(old, branch);

        let blocks = &mut self.function_mut(function).blocks;
        blocks.pop();
        let at = blocks.iter().position(|b| *b == old).map_or(blocks.len(), |p| p + 1);
        blocks.insert(at, new);
        new
    }

    // ==================== Params, scopes, variables ====================

    /// Add a parameter to `function`
    pub fn add_param(&mut self, function: FunctionId, name: impl Into<String>) -> ParamId {
        let id = ParamId(self.params.len() as u32);
        let index = self.function(function).params.len() as u32;
        self.params.push(Parameter {
            name: name.into(),
            parent: function,
            index,
        });
        self.function_mut(function).params.push(id);
        id
    }

    /// Parameter by id
    pub fn param(&self, id: ParamId) -> &Parameter {
        &self.params[id.index()]
    }

    /// Add a scope descriptor owned by `function`
    pub fn add_scope(&mut self, function: FunctionId, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(VariableScope {
            function,
            parent,
            variables: Vec::new(),
        });
        id
    }

    /// Scope by id
    pub fn scope(&self, id: ScopeId) -> &VariableScope {
        &self.scopes[id.index()]
    }

    /// Number of scopes ever created
    pub fn num_scopes(&self) -> usize {
        self.scopes.len()
    }

    /// Add a variable to `scope`
    pub fn add_variable(
        &mut self,
        scope: ScopeId,
        name: impl Into<String>,
        obeys_tdz: bool,
    ) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        let index = self.scopes[scope.index()].variables.len() as u32;
        self.variables.push(Some(Variable {
            name: name.into(),
            scope,
            obeys_tdz,
            index,
        }));
        self.scopes[scope.index()].variables.push(id);
        id
    }

    /// Variable by id
    pub fn variable(&self, id: VariableId) -> &Variable {
        self.variables[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("use of erased variable {:?}", id))
    }

    /// Is the variable still alive
    pub fn is_variable_alive(&self, id: VariableId) -> bool {
        self.variables.get(id.index()).is_some_and(|v| v.is_some())
    }

    /// Erase an unreferenced variable. Slots of the scope keep their indices.
    pub fn erase_variable(&mut self, id: VariableId) {
        assert!(
            !self.has_users(Value::Variable(id)),
            "erasing referenced variable {:?}",
            id
        );
        let scope = self.variable(id).scope;
        self.scopes[scope.index()].variables.retain(|v| *v != id);
        self.variables[id.index()] = None;
    }

    /// Number of slots an instance of `scope` needs
    pub fn scope_size(&self, scope: ScopeId) -> u32 {
        self.scope(scope)
            .variables
            .iter()
            .map(|v| self.variable(*v).index + 1)
            .max()
            .unwrap_or(0)
    }

    // ==================== Literals ====================

    /// Unique a literal
    pub fn literal(&mut self, literal: Literal) -> Value {
        if let Some(id) = self.literal_ids.get(&literal) {
            return Value::Literal(*id);
        }
        let id = LiteralId(self.literals.len() as u32);
        self.literals.push(literal.clone());
        self.literal_ids.insert(literal, id);
        Value::Literal(id)
    }

    /// Number literal
    pub fn number(&mut self, n: f64) -> Value {
        self.literal(Literal::Number(n))
    }

    /// String literal
    pub fn string(&mut self, s: impl Into<String>) -> Value {
        self.literal(Literal::String(s.into()))
    }

    /// BigInt literal
    pub fn bigint(&mut self, digits: impl Into<String>) -> Value {
        self.literal(Literal::BigInt(digits.into()))
    }

    /// Boolean literal
    pub fn boolean(&mut self, b: bool) -> Value {
        self.literal(Literal::Bool(b))
    }

    /// `null`
    pub fn null(&mut self) -> Value {
        self.literal(Literal::Null)
    }

    /// `undefined`
    pub fn undefined(&mut self) -> Value {
        self.literal(Literal::Undefined)
    }

    /// The TDZ marker
    pub fn empty(&mut self) -> Value {
        self.literal(Literal::Empty)
    }

    /// The global object
    pub fn global_object(&mut self) -> Value {
        self.literal(Literal::GlobalObject)
    }

    /// Literal by id
    pub fn literal_value(&self, id: LiteralId) -> &Literal {
        &self.literals[id.index()]
    }

    /// Literal behind a value
    pub fn as_literal(&self, value: Value) -> Option<&Literal> {
        value.as_literal().map(|id| self.literal_value(id))
    }

    // ==================== Instructions ====================

    /// Create a detached instruction
    pub fn create_inst(&mut self, kind: InstKind, operands: Vec<Value>, ty: Type) -> InstId {
        let id = InstId(self.insts.len() as u32);
        for op in &operands {
            self.users.entry(*op).or_default().push(id);
        }
        self.insts.push(Some(Instruction {
            kind,
            operands,
            ty,
            parent: None,
            location: SourceLoc::default(),
        }));
        id
    }

    /// Instruction by id
    pub fn inst(&self, id: InstId) -> &Instruction {
        self.insts[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("use of erased instruction {:?}", id))
    }

    /// Mutable instruction by id. Operands can only be changed through the
    /// module so the user lists stay in sync.
    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        self.insts[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("use of erased instruction {:?}", id))
    }

    /// Is the instruction still alive
    pub fn is_inst_alive(&self, id: InstId) -> bool {
        self.insts.get(id.index()).is_some_and(|i| i.is_some())
    }

    /// Block holding `id`
    pub fn parent_block(&self, id: InstId) -> BlockId {
        self.inst(id)
            .parent
            .unwrap_or_else(|| panic!("instruction {:?} is not in a block", id))
    }

    /// Function holding `id`
    pub fn parent_function(&self, id: InstId) -> FunctionId {
        self.block(self.parent_block(id)).parent
    }

    fn position(&self, id: InstId) -> usize {
        let block = self.parent_block(id);
        self.block(block)
            .insts
            .iter()
            .position(|i| *i == id)
            .unwrap_or_else(|| panic!("instruction {:?} missing from its block", id))
    }

    /// Append a detached instruction to `block`
    pub fn insert_at_end(&mut self, block: BlockId, inst: InstId) {
        debug_assert!(self.inst(inst).parent.is_none());
        self.inst_mut(inst).parent = Some(block);
        self.block_mut(block).insts.push(inst);
    }

    /// Insert a detached instruction at the start of `block`
    pub fn insert_at_start(&mut self, block: BlockId, inst: InstId) {
        debug_assert!(self.inst(inst).parent.is_none());
        self.inst_mut(inst).parent = Some(block);
        self.block_mut(block).insts.insert(0, inst);
    }

    /// Insert a detached instruction right before `before`
    pub fn insert_before(&mut self, before: InstId, inst: InstId) {
        debug_assert!(self.inst(inst).parent.is_none());
        let block = self.parent_block(before);
        let pos = self.position(before);
        self.inst_mut(inst).parent = Some(block);
        self.block_mut(block).insts.insert(pos, inst);
    }

    /// Take `inst` out of its block without touching its operands
    pub fn detach(&mut self, inst: InstId) {
        if self.inst(inst).parent.is_none() {
            return;
        }
        let block = self.parent_block(inst);
        let pos = self.position(inst);
        self.block_mut(block).insts.remove(pos);
        self.inst_mut(inst).parent = None;
    }

    /// Move `inst` right before `before`
    pub fn move_before(&mut self, inst: InstId, before: InstId) {
        self.detach(inst);
        self.insert_before(before, inst);
    }

    /// Move `inst` to the start of `block`
    pub fn move_to_start(&mut self, inst: InstId, block: BlockId) {
        self.detach(inst);
        self.insert_at_start(block, inst);
    }

    /// Move `inst` to the end of `block`
    pub fn move_to_end(&mut self, inst: InstId, block: BlockId) {
        self.detach(inst);
        self.insert_at_end(block, inst);
    }

    fn drop_operands(&mut self, inst: InstId) {
        let operands = std::mem::take(&mut self.inst_mut(inst).operands);
        for op in operands {
            self.remove_user(op, inst);
        }
    }

    /// Erase an instruction whose result is unused
    pub fn erase_inst(&mut self, inst: InstId) {
        assert!(
            !self.has_users(Value::Inst(inst)),
            "erasing instruction {:?} that still has users",
            inst
        );
        self.drop_operands(inst);
        self.detach(inst);
        self.insts[inst.index()] = None;
    }

    // ==================== Uses ====================

    fn remove_user(&mut self, value: Value, inst: InstId) {
        if let Some(list) = self.users.get_mut(&value) {
            if let Some(pos) = list.iter().position(|u| *u == inst) {
                list.remove(pos);
            }
            if list.is_empty() {
                self.users.remove(&value);
            }
        }
    }

    /// Instructions using `value`, in the order the uses were created
    pub fn users(&self, value: Value) -> Vec<InstId> {
        let mut out = Vec::new();
        if let Some(list) = self.users.get(&value) {
            for user in list {
                if !out.contains(user) {
                    out.push(*user);
                }
            }
        }
        out
    }

    /// Is `value` used anywhere
    pub fn has_users(&self, value: Value) -> bool {
        self.users.get(&value).is_some_and(|l| !l.is_empty())
    }

    /// Number of distinct users
    pub fn num_users(&self, value: Value) -> usize {
        self.users(value).len()
    }

    /// Set operand `index` of `inst`
    pub fn set_operand(&mut self, inst: InstId, index: usize, value: Value) {
        let old = self.inst(inst).operands[index];
        if old == value {
            return;
        }
        self.remove_user(old, inst);
        self.inst_mut(inst).operands[index] = value;
        self.users.entry(value).or_default().push(inst);
    }

    /// Append an operand
    pub fn push_operand(&mut self, inst: InstId, value: Value) {
        self.inst_mut(inst).operands.push(value);
        self.users.entry(value).or_default().push(inst);
    }

    /// Remove operand `index`, shifting the following ones
    pub fn remove_operand(&mut self, inst: InstId, index: usize) {
        let old = self.inst_mut(inst).operands.remove(index);
        self.remove_user(old, inst);
    }

    /// Replace every use of `old` with `new`
    pub fn replace_all_uses(&mut self, old: Value, new: Value) {
        if old == new {
            return;
        }
        for user in self.users(old) {
            let n = self.inst(user).operands.len();
            for i in 0..n {
                if self.inst(user).operands[i] == old {
                    self.set_operand(user, i, new);
                }
            }
        }
    }

    /// Type of any value
    pub fn value_type(&self, value: Value) -> Type {
        match value {
            Value::Literal(id) => self.literal_value(id).ty(),
            Value::Inst(id) => self.inst(id).ty,
            Value::Param(_) => Type::ANY,
            Value::Function(_) => Type::OBJECT,
            Value::Block(_) | Value::Variable(_) | Value::Scope(_) => Type::empty(),
        }
    }

    // ==================== Phis ====================

    /// Phis at the start of `block`
    pub fn phis(&self, block: BlockId) -> Vec<InstId> {
        self.block(block)
            .insts
            .iter()
            .copied()
            .take_while(|i| self.inst(*i).kind == InstKind::Phi)
            .collect()
    }

    /// `(value, predecessor)` pairs of a phi
    pub fn phi_entries(&self, phi: InstId) -> Vec<(Value, BlockId)> {
        let inst = self.inst(phi);
        debug_assert_eq!(inst.kind, InstKind::Phi);
        inst.operands
            .chunks_exact(2)
            .map(|pair| match pair[1] {
                Value::Block(b) => (pair[0], b),
                other => unreachable!("phi edge is not a block: {:?}", other),
            })
            .collect()
    }

    /// Add an incoming entry
    pub fn phi_add_entry(&mut self, phi: InstId, value: Value, block: BlockId) {
        self.push_operand(phi, value);
        self.push_operand(phi, Value::Block(block));
    }

    /// Remove entry number `index`
    pub fn phi_remove_entry(&mut self, phi: InstId, index: usize) {
        self.remove_operand(phi, 2 * index + 1);
        self.remove_operand(phi, 2 * index);
    }

    /// Remove every entry coming from `block`
    pub fn phi_remove_entries_from(&mut self, phi: InstId, block: BlockId) {
        let entries = self.phi_entries(phi);
        for (i, (_, pred)) in entries.iter().enumerate().rev() {
            if *pred == block {
                self.phi_remove_entry(phi, i);
            }
        }
    }

    /// Value flowing in from `block`
    pub fn phi_incoming(&self, phi: InstId, block: BlockId) -> Option<Value> {
        self.phi_entries(phi)
            .into_iter()
            .find(|(_, b)| *b == block)
            .map(|(v, _)| v)
    }

    // ==================== Queries ====================

    /// Every instruction of `function` in layout order
    pub fn function_insts(&self, function: FunctionId) -> Vec<InstId> {
        self.function(function)
            .blocks
            .iter()
            .flat_map(|b| self.block(*b).insts.iter().copied())
            .collect()
    }

    /// Does the function contain a direct eval
    pub fn uses_direct_eval(&self, function: FunctionId) -> bool {
        self.function_insts(function)
            .iter()
            .any(|i| self.inst(*i).kind == InstKind::DirectEval)
    }

    /// Names of the variables of every scope visible from `scope`, innermost
    /// scope first
    pub fn scope_chain_names(&self, scope: ScopeId) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        let mut current = Some(scope);
        while let Some(s) = current {
            out.push(
                self.scope(s)
                    .variables
                    .iter()
                    .map(|v| self.variable(*v).name.clone())
                    .collect(),
            );
            current = self.scope(s).parent;
        }
        out
    }

    /// Innermost scope a function can see: the first scope it creates, or its
    /// parent scope
    pub fn innermost_scope(&self, function: FunctionId) -> Option<ScopeId> {
        self.function_insts(function)
            .into_iter()
            .find(|i| self.inst(*i).kind == InstKind::CreateScope)
            .and_then(|i| match self.inst(i).operand(0) {
                Value::Scope(s) => Some(s),
                _ => None,
            })
            .or(self.function(function).parent_scope)
    }
}
