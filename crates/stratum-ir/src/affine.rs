//! Affine expressions over named integer indices.
//!
//! An [`Affine`] is a polynomial of total degree at most one: a sum of
//! `coefficient * index` terms plus an integer constant. The canonical form
//! maps index names to nonzero coefficients, with the empty name denoting the
//! constant term, so structural equality is semantic equality.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use crate::error::IrError;

/// A linear polynomial over named integer indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Affine {
    // Invariant: no zero coefficients are stored; "" keys the constant term.
    terms: BTreeMap<String, i64>,
}

impl Affine {
    /// The zero polynomial.
    pub fn zero() -> Self {
        Self::default()
    }

    /// A constant polynomial.
    pub fn constant(value: i64) -> Self {
        Self::term("", value)
    }

    /// A single `coeff * name` term (or the constant term when `name` is empty).
    pub fn term(name: impl Into<String>, coeff: i64) -> Self {
        let mut terms = BTreeMap::new();
        if coeff != 0 {
            terms.insert(name.into(), coeff);
        }
        Self { terms }
    }

    /// Returns the coefficient of `name` (zero if absent).
    pub fn get(&self, name: &str) -> i64 {
        self.terms.get(name).copied().unwrap_or(0)
    }

    /// Returns the constant term.
    pub fn constant_value(&self) -> i64 {
        self.get("")
    }

    /// Returns `true` if no index terms are present.
    pub fn is_constant(&self) -> bool {
        self.terms.keys().all(|name| name.is_empty())
    }

    /// Returns `true` if this is the zero polynomial.
    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Iterates over `(name, coefficient)` pairs; the empty name is the constant.
    pub fn terms(&self) -> impl Iterator<Item = (&str, i64)> {
        self.terms.iter().map(|(name, &coeff)| (name.as_str(), coeff))
    }

    /// Evaluates under a mapping from index names to values.
    ///
    /// Every non-constant term's index must be present in `env`.
    pub fn eval(&self, env: &BTreeMap<String, i64>) -> Result<i64, IrError> {
        let mut total = 0i64;
        for (name, coeff) in &self.terms {
            if name.is_empty() {
                total += coeff;
            } else {
                let value = env.get(name).ok_or_else(|| IrError::UnboundIndex {
                    name: name.clone(),
                })?;
                total += coeff * value;
            }
        }
        Ok(total)
    }

    /// Replaces every occurrence of `name` with `with`.
    pub fn substitute(&self, name: &str, with: &Affine) -> Affine {
        let mut out = Affine::zero();
        for (term, &coeff) in &self.terms {
            if term == name {
                out += with.clone() * coeff;
            } else {
                out += Affine::term(term.clone(), coeff);
            }
        }
        out
    }

    fn add_term(&mut self, name: &str, coeff: i64) {
        if coeff == 0 {
            return;
        }
        let entry = self.terms.entry(name.to_string()).or_insert(0);
        *entry += coeff;
        if *entry == 0 {
            self.terms.remove(name);
        }
    }
}

impl From<&str> for Affine {
    /// A bare index with coefficient one.
    fn from(name: &str) -> Self {
        Affine::term(name, 1)
    }
}

impl AddAssign<&Affine> for Affine {
    fn add_assign(&mut self, rhs: &Affine) {
        for (name, &coeff) in &rhs.terms {
            self.add_term(name, coeff);
        }
    }
}

impl AddAssign<Affine> for Affine {
    fn add_assign(&mut self, rhs: Affine) {
        *self += &rhs;
    }
}

impl Add for Affine {
    type Output = Affine;
    fn add(mut self, rhs: Affine) -> Affine {
        self += &rhs;
        self
    }
}

impl SubAssign<&Affine> for Affine {
    fn sub_assign(&mut self, rhs: &Affine) {
        for (name, &coeff) in &rhs.terms {
            self.add_term(name, -coeff);
        }
    }
}

impl Sub for Affine {
    type Output = Affine;
    fn sub(mut self, rhs: Affine) -> Affine {
        self -= &rhs;
        self
    }
}

impl Mul<i64> for Affine {
    type Output = Affine;
    fn mul(self, rhs: i64) -> Affine {
        if rhs == 0 {
            return Affine::zero();
        }
        let terms = self
            .terms
            .into_iter()
            .map(|(name, coeff)| (name, coeff * rhs))
            .collect();
        Affine { terms }
    }
}

impl Neg for Affine {
    type Output = Affine;
    fn neg(self) -> Affine {
        self * -1
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "0");
        }
        let mut first = true;
        for (name, &coeff) in &self.terms {
            if first {
                if coeff < 0 {
                    write!(f, "-")?;
                }
                first = false;
            } else if coeff < 0 {
                write!(f, " - ")?;
            } else {
                write!(f, " + ")?;
            }
            let mag = coeff.unsigned_abs();
            if name.is_empty() {
                write!(f, "{mag}")?;
            } else if mag == 1 {
                write!(f, "{name}")?;
            } else {
                write!(f, "{mag}*{name}")?;
            }
        }
        Ok(())
    }
}
