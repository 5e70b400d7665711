//! The symbolic value algebra that abstract register and stack-slot
//! contents are drawn from.
//!
//! A value is either completely opaque, a known constant, or a symbol (a
//! base register binding such as the stack pointer) plus a constant offset.
//! Every value additionally carries a precision bit: `precise == true`
//! asserts the value describes the runtime contents exactly, `false` means
//! it is a best-effort hint that downstream classification may still use,
//! but must not treat as exact.
//!
//! The simplification rules are deliberately narrow: a constant folded into
//! a symbol's offset is the *only* symbolic simplification performed.
//! Anything richer (symbol plus symbol, scaled symbols, several constants
//! spread through an expression) collapses to [`SymbolicValue::Unknown`].
//! The patterns kept are exactly the address computations compilers emit
//! for stack slots, globals and literal pools; widening the algebra would
//! change which accesses downstream consumers see as precise.

/// The base a [`SymbolicValue::Symbol`] is relative to.
///
/// A symbol's offset is only meaningful relative to the *current* binding
/// of its base, which is rebound at function entry/exit (for
/// [`SymbolKind::StackPointer`]) or fixed for the whole program (the
/// others).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum SymbolKind {
    /// The architecture's stack pointer at the current function's entry.
    StackPointer,
    /// The MIPS `$gp` global pointer.
    GlobalPointer,
    /// The program counter of the instruction being simulated.
    ProgramCounter,
    /// A pending `lui`-style upper immediate; payload is the already
    /// shifted-left-by-16 value.
    UpperImmediate(u32),
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SymbolKind::StackPointer => write!(f, "sp"),
            SymbolKind::GlobalPointer => write!(f, "gp"),
            SymbolKind::ProgramCounter => write!(f, "pc"),
            SymbolKind::UpperImmediate(v) => write!(f, "hi({:#x})", v),
        }
    }
}

/// A symbolic description of a register's or stack slot's contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub enum SymbolicValue {
    /// Nothing is known.
    Unknown,
    /// A compile-time constant.
    Constant(i64),
    /// `kind`'s current binding plus `offset` bytes.
    Symbol { kind: SymbolKind, offset: i64 },
}

// `Display` is used by the report writer and by defect diagnostics; keep it
// compact ("sp + 4", "?", "0x40178").
impl std::fmt::Display for SymbolicValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SymbolicValue::Unknown => write!(f, "?"),
            SymbolicValue::Constant(c) => {
                if *c < 0 {
                    write!(f, "-{:#x}", -c)
                } else {
                    write!(f, "{:#x}", c)
                }
            }
            SymbolicValue::Symbol { kind, offset } => {
                if *offset == 0 {
                    write!(f, "{}", kind)
                } else if *offset < 0 {
                    write!(f, "{} - {:#x}", kind, -offset)
                } else {
                    write!(f, "{} + {:#x}", kind, offset)
                }
            }
        }
    }
}

/// A [`SymbolicValue`] together with its precision bit. This is the element
/// type of both the register file and the stack model.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AbstractValue {
    pub value: SymbolicValue,
    pub precise: bool,
}

impl AbstractValue {
    /// A completely opaque value. Never precise.
    pub fn unknown() -> Self {
        Self {
            value: SymbolicValue::Unknown,
            precise: false,
        }
    }

    /// A known constant, exactly describing the runtime contents.
    pub fn constant(v: i64) -> Self {
        Self {
            value: SymbolicValue::Constant(v),
            precise: true,
        }
    }

    /// A symbol plus offset, with the given precision.
    pub fn symbol(kind: SymbolKind, offset: i64, precise: bool) -> Self {
        Self {
            value: SymbolicValue::Symbol { kind, offset },
            precise,
        }
    }

    /// Whether the value is [`SymbolicValue::Unknown`].
    pub fn is_unknown(&self) -> bool {
        matches!(self.value, SymbolicValue::Unknown)
    }

    /// Abstract addition. Folds constants; folds a constant into a symbol's
    /// offset from either side (addition commutes); everything else is
    /// `Unknown`.
    pub fn add(a: Self, b: Self) -> Self {
        let precise = a.precise && b.precise;
        match (a.value, b.value) {
            (SymbolicValue::Constant(x), SymbolicValue::Constant(y)) => Self {
                value: SymbolicValue::Constant(x.wrapping_add(y)),
                precise,
            },
            (SymbolicValue::Constant(c), SymbolicValue::Symbol { kind, offset })
            | (SymbolicValue::Symbol { kind, offset }, SymbolicValue::Constant(c)) => Self {
                value: SymbolicValue::Symbol {
                    kind,
                    offset: offset.wrapping_add(c),
                },
                precise,
            },
            _ => Self::unknown(),
        }
    }

    /// Abstract addition for augmenting adds (PC-relative array
    /// addressing): if exactly one operand is opaque, the other operand is
    /// propagated verbatim as an imprecise hint instead of collapsing the
    /// result. This keeps array-base classification alive for accesses
    /// whose index register is unmodelled.
    pub fn add_augmenting(a: Self, b: Self) -> Self {
        match (a.is_unknown(), b.is_unknown()) {
            (true, false) => Self {
                value: b.value,
                precise: false,
            },
            (false, true) => Self {
                value: a.value,
                precise: false,
            },
            _ => Self::add(a, b),
        }
    }

    /// Abstract subtraction. Folds constants; folds a constant subtrahend
    /// into a symbol's offset. A symbol *subtrahend* never simplifies:
    /// subtraction does not commute.
    pub fn sub(a: Self, b: Self) -> Self {
        let precise = a.precise && b.precise;
        match (a.value, b.value) {
            (SymbolicValue::Constant(x), SymbolicValue::Constant(y)) => Self {
                value: SymbolicValue::Constant(x.wrapping_sub(y)),
                precise,
            },
            (SymbolicValue::Symbol { kind, offset }, SymbolicValue::Constant(c)) => Self {
                value: SymbolicValue::Symbol {
                    kind,
                    offset: offset.wrapping_sub(c),
                },
                precise,
            },
            _ => Self::unknown(),
        }
    }

    /// Abstract multiplication. Only constant-by-constant folds; a scaled
    /// symbol is not representable in this algebra.
    pub fn mul(a: Self, b: Self) -> Self {
        match (a.value, b.value) {
            (SymbolicValue::Constant(x), SymbolicValue::Constant(y)) => Self {
                value: SymbolicValue::Constant(x.wrapping_mul(y)),
                precise: a.precise && b.precise,
            },
            _ => Self::unknown(),
        }
    }

    /// Bitwise NOT. Defined only on constants.
    pub fn complement(a: Self) -> Self {
        match a.value {
            SymbolicValue::Constant(x) => Self {
                value: SymbolicValue::Constant(!x),
                precise: a.precise,
            },
            _ => Self::unknown(),
        }
    }
}

impl std::fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.precise {
            write!(f, "{}", self.value)
        } else {
            write!(f, "~{}", self.value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp(offset: i64) -> AbstractValue {
        AbstractValue::symbol(SymbolKind::StackPointer, offset, true)
    }

    #[test]
    fn constant_folding() {
        assert_eq!(
            AbstractValue::add(AbstractValue::constant(3), AbstractValue::constant(4)),
            AbstractValue::constant(7)
        );
        assert_eq!(
            AbstractValue::sub(AbstractValue::constant(3), AbstractValue::constant(4)),
            AbstractValue::constant(-1)
        );
        assert_eq!(
            AbstractValue::mul(AbstractValue::constant(3), AbstractValue::constant(4)),
            AbstractValue::constant(12)
        );
        assert_eq!(
            AbstractValue::complement(AbstractValue::constant(0)),
            AbstractValue::constant(-1)
        );
    }

    #[test]
    fn add_commutes_over_symbol() {
        assert_eq!(AbstractValue::add(sp(0), AbstractValue::constant(4)), sp(4));
        assert_eq!(AbstractValue::add(AbstractValue::constant(4), sp(0)), sp(4));
    }

    #[test]
    fn sub_does_not_commute() {
        assert_eq!(AbstractValue::sub(sp(8), AbstractValue::constant(4)), sp(4));
        assert_eq!(
            AbstractValue::sub(AbstractValue::constant(4), sp(8)),
            AbstractValue::unknown()
        );
    }

    #[test]
    fn symbol_plus_symbol_collapses() {
        assert_eq!(AbstractValue::add(sp(0), sp(4)), AbstractValue::unknown());
        assert_eq!(
            AbstractValue::mul(sp(0), AbstractValue::constant(2)),
            AbstractValue::unknown()
        );
        assert_eq!(AbstractValue::complement(sp(0)), AbstractValue::unknown());
    }

    #[test]
    fn precision_propagates() {
        let imprecise = AbstractValue {
            precise: false,
            ..AbstractValue::constant(4)
        };
        assert!(!AbstractValue::add(sp(0), imprecise).precise);
        assert!(AbstractValue::add(sp(0), AbstractValue::constant(4)).precise);
        // An unknown result is never precise, no matter the inputs.
        assert!(!AbstractValue::add(sp(0), sp(0)).precise);
    }

    #[test]
    fn augmenting_add_propagates_known_base() {
        let r = AbstractValue::add_augmenting(sp(8), AbstractValue::unknown());
        assert_eq!(
            r.value,
            SymbolicValue::Symbol {
                kind: SymbolKind::StackPointer,
                offset: 8
            }
        );
        assert!(!r.precise);
        // Both known: behaves like a plain add.
        assert_eq!(
            AbstractValue::add_augmenting(sp(0), AbstractValue::constant(4)),
            sp(4)
        );
    }
}
