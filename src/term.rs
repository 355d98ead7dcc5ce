//! Knowledge-representation terms, substitutions and unification.
//!
//! The history subsystem treats the KR language as an opaque oracle: it only
//! needs to apply substitutions and compute most-general unifiers. The
//! [`KrEngine`] trait is that seam. [`SyntacticUnifier`] is a plain
//! first-order implementation good enough for Prolog-like languages and for
//! tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name and arity identifying a predicate, function symbol, module or action.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Symbol name.
    pub name: String,
    /// Number of arguments.
    pub arity: usize,
}

impl Signature {
    /// Creates a signature.
    #[must_use]
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// A first-order term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Term {
    /// A logic variable.
    Var {
        /// Variable name.
        name: String,
    },
    /// An atom or number.
    Atom {
        /// Atom text.
        name: String,
    },
    /// A quoted string.
    Str {
        /// String contents.
        value: String,
    },
    /// A compound term `functor(args...)`.
    Compound {
        /// Functor name.
        functor: String,
        /// Arguments.
        args: Vec<Term>,
    },
}

impl Term {
    /// Creates a variable.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var { name: name.into() }
    }

    /// Creates an atom.
    #[must_use]
    pub fn atom(name: impl Into<String>) -> Self {
        Self::Atom { name: name.into() }
    }

    /// Creates a quoted string.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Str { value: value.into() }
    }

    /// Creates a compound term. With no arguments this is an atom-like
    /// call such as `greet()`; it unifies with the atom `greet`.
    #[must_use]
    pub fn compound(functor: impl Into<String>, args: Vec<Term>) -> Self {
        Self::Compound {
            functor: functor.into(),
            args,
        }
    }

    /// The signature of this term, `None` for variables and strings.
    #[must_use]
    pub fn signature(&self) -> Option<Signature> {
        match self {
            Self::Var { .. } | Self::Str { .. } => None,
            Self::Atom { name } => Some(Signature::new(name.clone(), 0)),
            Self::Compound { functor, args } => Some(Signature::new(functor.clone(), args.len())),
        }
    }

    /// Returns true if the term contains no variables.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        match self {
            Self::Var { .. } => false,
            Self::Atom { .. } | Self::Str { .. } => true,
            Self::Compound { args, .. } => args.iter().all(Term::is_ground),
        }
    }

    /// All variable names occurring in this term.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Var { name } => {
                out.insert(name.clone());
            }
            Self::Atom { .. } | Self::Str { .. } => {}
            Self::Compound { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
        }
    }

    fn occurs(&self, var: &str) -> bool {
        match self {
            Self::Var { name } => name == var,
            Self::Atom { .. } | Self::Str { .. } => false,
            Self::Compound { args, .. } => args.iter().any(|a| a.occurs(var)),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var { name } | Self::Atom { name } => write!(f, "{name}"),
            Self::Str { value } => write!(f, "\"{value}\""),
            Self::Compound { functor, args } => {
                write!(f, "{functor}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A mapping from variable names to terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Substitution(BTreeMap<String, Term>);

impl Substitution {
    /// Creates an empty substitution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style binding.
    #[must_use]
    pub fn with(mut self, var: impl Into<String>, term: Term) -> Self {
        self.0.insert(var.into(), term);
        self
    }

    /// Binds `var` to `term`, replacing any previous binding.
    pub fn bind(&mut self, var: impl Into<String>, term: Term) {
        self.0.insert(var.into(), term);
    }

    /// The binding for `var`, if any.
    #[must_use]
    pub fn get(&self, var: &str) -> Option<&Term> {
        self.0.get(var)
    }

    /// Returns true if `var` is bound.
    #[must_use]
    pub fn binds(&self, var: &str) -> bool {
        self.0.contains_key(var)
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the bindings in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Term)> {
        self.0.iter()
    }

    /// Applies the substitution to `term`, following chains of bindings.
    ///
    /// A variable met again while its own binding is being expanded is
    /// left in place, so cyclic substitutions such as `{X/Y, Y/X}`
    /// terminate.
    #[must_use]
    pub fn apply(&self, term: &Term) -> Term {
        self.apply_tracked(term, &mut Vec::new())
    }

    fn apply_tracked<'a>(&'a self, term: &Term, expanding: &mut Vec<&'a str>) -> Term {
        match term {
            Term::Var { name } => {
                if expanding.contains(&name.as_str()) {
                    return term.clone();
                }
                match self.0.get_key_value(name) {
                    Some((var, bound)) => {
                        expanding.push(var);
                        let applied = self.apply_tracked(bound, expanding);
                        expanding.pop();
                        applied
                    }
                    None => term.clone(),
                }
            }
            Term::Atom { .. } | Term::Str { .. } => term.clone(),
            Term::Compound { functor, args } => Term::Compound {
                functor: functor.clone(),
                args: args.iter().map(|a| self.apply_tracked(a, expanding)).collect(),
            },
        }
    }
}

impl FromIterator<(String, Term)> for Substitution {
    fn from_iter<I: IntoIterator<Item = (String, Term)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, term)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{var}/{term}")?;
        }
        write!(f, "}}")
    }
}

/// The knowledge-representation oracle consumed by the trace explainer.
pub trait KrEngine: Send + Sync {
    /// Applies `subst` to `term`.
    fn apply_subst(&self, term: &Term, subst: &Substitution) -> Term;

    /// Computes the most general unifier of `a` and `b`, if one exists.
    fn mgu(&self, a: &Term, b: &Term) -> Option<Substitution>;
}

/// Robinson unification with occurs check.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntacticUnifier;

impl SyntacticUnifier {
    fn walk<'a>(term: &'a Term, subst: &'a Substitution) -> &'a Term {
        let mut current = term;
        while let Term::Var { name } = current {
            match subst.get(name) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current
    }

    fn unify(a: &Term, b: &Term, subst: &mut Substitution) -> bool {
        let a = Self::walk(a, subst).clone();
        let b = Self::walk(b, subst).clone();

        match (&a, &b) {
            (Term::Var { name: x }, Term::Var { name: y }) if x == y => true,
            (Term::Var { name }, other) | (other, Term::Var { name }) => {
                if subst.apply(other).occurs(name) {
                    return false;
                }
                subst.bind(name.clone(), other.clone());
                true
            }
            (Term::Atom { name: x }, Term::Atom { name: y }) => x == y,
            // `greet` and `greet()` denote the same zero-arity term.
            (Term::Atom { name }, Term::Compound { functor, args })
            | (Term::Compound { functor, args }, Term::Atom { name }) => args.is_empty() && name == functor,
            (Term::Str { value: x }, Term::Str { value: y }) => x == y,
            (
                Term::Compound { functor: f, args: xs },
                Term::Compound { functor: g, args: ys },
            ) => {
                f == g
                    && xs.len() == ys.len()
                    && xs.iter().zip(ys).all(|(x, y)| Self::unify(x, y, subst))
            }
            _ => false,
        }
    }
}

impl KrEngine for SyntacticUnifier {
    fn apply_subst(&self, term: &Term, subst: &Substitution) -> Term {
        subst.apply(term)
    }

    fn mgu(&self, a: &Term, b: &Term) -> Option<Substitution> {
        let mut subst = Substitution::new();
        if !Self::unify(a, b, &mut subst) {
            return None;
        }
        // Resolve chains so every binding is fully applied.
        let resolved = subst
            .iter()
            .map(|(var, term)| (var.clone(), subst.apply(term)))
            .collect();
        Some(resolved)
    }
}
