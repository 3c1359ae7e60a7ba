//! Adapters from typed Rust functions to the erased builtin signature.
//!
//! Builtins are stored as [`OperationFn`]: they take the evaluated argument
//! vector and return a value or an error. Writing every builtin against that
//! raw shape means repeating the same arity and type checks, so the traits
//! here let a builtin be written as an ordinary function such as
//! `fn(&str, f64) -> Result<Value, Error>` and wrapped once at registration.
//!
//! Two families exist:
//!
//! - [`IntoOperation`] for fixed arity. Each parameter converts through
//!   [`FromParam`]; a wrong argument count is an arity error.
//! - [`IntoVariadicOperation`] for a fixed prefix followed by a rest
//!   parameter. The rest parameter is one of the typed iterators
//!   ([`NumIter`], [`StringIter`], [`ValueIter`]) which type-check every
//!   element before the builtin runs.

use crate::Error;
use crate::ast::{NumberType, Value};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

/// Erased builtin signature. Arguments arrive owned so a builtin can move
/// payloads out instead of cloning them.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync;

/// Conversion of a single argument slot into a typed parameter.
///
/// `Param<'a>` may borrow from the slot (`&str`, iterators) or take it by
/// value (`Value`, numbers, booleans).
pub(crate) trait FromParam {
    type Param<'a>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error>;
}

impl FromParam for Value {
    type Param<'a> = Value;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        Ok(std::mem::replace(value, Value::Nil))
    }
}

// Scalars with a `TryInto` from `Value` (see ast.rs): numbers and booleans.
impl<T> FromParam for T
where
    Value: std::convert::TryInto<T, Error = Error>,
{
    type Param<'a> = T;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        let owned = std::mem::replace(value, Value::Nil);
        <Value as std::convert::TryInto<T>>::try_into(owned)
    }
}

impl FromParam for &str {
    type Param<'a> = &'a str;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match value {
            Value::String(s) => Ok(s.as_str()),
            other => Err(Error::TypeError(format!(
                "expected string, got {}",
                other.type_name()
            ))),
        }
    }
}

// A list argument viewed element-wise. Nil counts as the empty list.
impl<'b, K> FromParam for TypedValueIter<'b, K>
where
    K: ElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match value {
            Value::List(items) => TypedValueIter::<K>::new(items.as_slice()),
            Value::Nil => TypedValueIter::<K>::new(&[]),
            other => Err(Error::TypeError(format!(
                "expected list, got {}",
                other.type_name()
            ))),
        }
    }
}

/// How to view one `Value` as an element of a typed iterator.
///
/// `precheck` runs over the whole slice before iteration starts, so
/// `project` only ever sees values that passed it.
#[doc(hidden)]
pub trait ElementKind {
    type Item<'a>;

    fn precheck(slice: &[Value]) -> Result<(), Error>;
    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>>;
}

/// Iterator over a pre-checked slice of values.
#[doc(hidden)]
pub struct TypedValueIter<'a, K: ElementKind> {
    inner: std::slice::Iter<'a, Value>,
    _marker: PhantomData<K>,
}

impl<'a, K> TypedValueIter<'a, K>
where
    K: ElementKind,
{
    pub(crate) fn new(values: &'a [Value]) -> Result<Self, Error> {
        K::precheck(values)?;
        Ok(TypedValueIter {
            inner: values.iter(),
            _marker: PhantomData,
        })
    }
}

impl<'a, K> Iterator for TypedValueIter<'a, K>
where
    K: ElementKind,
{
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        K::project(self.inner.next()?)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> ExactSizeIterator for TypedValueIter<'_, K> where K: ElementKind {}
impl<K> FusedIterator for TypedValueIter<'_, K> where K: ElementKind {}

fn check_all(slice: &[Value], wanted: &str, ok: impl Fn(&Value) -> bool) -> Result<(), Error> {
    match slice.iter().find(|v| !ok(v)) {
        Some(bad) => Err(Error::TypeError(format!(
            "expected {wanted}, got {}",
            bad.type_name()
        ))),
        None => Ok(()),
    }
}

#[doc(hidden)]
pub struct AnyKind;

impl ElementKind for AnyKind {
    type Item<'a> = &'a Value;

    fn precheck(_slice: &[Value]) -> Result<(), Error> {
        Ok(())
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        Some(v)
    }
}

#[doc(hidden)]
pub struct NumberKind;

impl ElementKind for NumberKind {
    type Item<'a> = NumberType;

    fn precheck(slice: &[Value]) -> Result<(), Error> {
        check_all(slice, "number", |v| matches!(v, Value::Number(_)))
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        match v {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

#[doc(hidden)]
pub struct StringKind;

impl ElementKind for StringKind {
    type Item<'a> = &'a str;

    fn precheck(slice: &[Value]) -> Result<(), Error> {
        check_all(slice, "string", |v| matches!(v, Value::String(_)))
    }

    fn project<'a>(v: &'a Value) -> Option<Self::Item<'a>> {
        match v {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Arguments of any type, by reference.
pub type ValueIter<'a> = TypedValueIter<'a, AnyKind>;

/// Numeric arguments; a non-number anywhere is a type error up front.
pub type NumIter<'a> = TypedValueIter<'a, NumberKind>;

/// String arguments; a non-string anywhere is a type error up front.
pub type StringIter<'a> = TypedValueIter<'a, StringKind>;

/// Construction of a rest parameter from the trailing argument slice.
pub(crate) trait FromRest {
    type Param<'a>;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error>;
}

impl<K> FromRest for TypedValueIter<'static, K>
where
    K: ElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error> {
        TypedValueIter::<K>::new(slice)
    }
}

/// Lets a builtin return either `T: Into<Value>` or `Result<T, Error>`.
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

impl<T> IntoValueResult for T
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        Ok(self.into())
    }
}

/// Fixed-arity typed function to erased builtin. `Args` is the tuple of
/// parameter marker types and only serves to select an impl.
pub trait IntoOperation<Args> {
    fn into_operation(self) -> Arc<OperationFn>;
}

/// Typed function ending in a rest parameter to erased builtin.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;
}

impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            let rest = <I as FromRest>::from_rest(&args[..])?;
            (self)(rest).into_value_result()
        })
    }
}

macro_rules! impl_variadic_with_prefix {
    ($prefix:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, I, R, $( $A ),+> IntoVariadicOperation<( $( $A, )+ I, )> for F
        where
            I: FromRest,
            $( $A: FromParam, )+
            F: for<'a> Fn(
                    $( <$A as FromParam>::Param<'a> ),+,
                    <I as FromRest>::Param<'a>,
                ) -> R
                + Send
                + Sync
                + 'static,
            R: IntoValueResult,
        {
            fn into_variadic_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let got = args.len();
                    let &mut [ $( ref mut $v ),+, ref mut rest @ .. ] = args.as_mut_slice() else {
                        return Err(Error::arity_error($prefix, got));
                    };
                    $( let $p = <$A as FromParam>::from_arg($v)?; )+
                    let rest = <I as FromRest>::from_rest(&*rest)?;
                    (self)( $( $p ),+, rest ).into_value_result()
                })
            }
        }
    };
}

impl_variadic_with_prefix!(1, v0, p0: A1);
impl_variadic_with_prefix!(2, v0, p0: A1, v1, p1: A2);
impl_variadic_with_prefix!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);

macro_rules! impl_fixed_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: for<'a> Fn( $( <$A as FromParam>::Param<'a> ),+ ) -> R
                + Send
                + Sync
                + 'static,
            $( $A: FromParam, )+
            R: IntoValueResult,
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let got = args.len();
                    let &mut [ $( ref mut $v ),+ ] = args.as_mut_slice() else {
                        return Err(Error::arity_error($arity, got));
                    };
                    $( let $p = <$A as FromParam>::from_arg($v)?; )+
                    (self)( $( $p ),+ ).into_value_result()
                })
            }
        }
    };
}

impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(0, args.len()));
            }
            (self)().into_value_result()
        })
    }
}

impl_fixed_arity!(1, v0, p0: A1);
impl_fixed_arity!(2, v0, p0: A1, v1, p1: A2);
impl_fixed_arity!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
impl_fixed_arity!(4, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4);

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    fn fixed<Args, F: IntoOperation<Args>>(f: F) -> Arc<OperationFn> {
        f.into_operation()
    }

    fn variadic<Args, F: IntoVariadicOperation<Args>>(f: F) -> Arc<OperationFn> {
        f.into_variadic_operation()
    }

    fn concat(a: &str, b: &str) -> String {
        format!("{a}{b}")
    }

    fn half(n: NumberType) -> NumberType {
        n / 2.0
    }

    fn identity(v: Value) -> Value {
        v
    }

    fn always() -> bool {
        true
    }

    fn sum(nums: NumIter<'_>) -> NumberType {
        nums.sum()
    }

    fn offset_count(first: NumberType, rest: ValueIter<'_>) -> NumberType {
        first + rest.len() as NumberType
    }

    fn count(items: ValueIter<'_>) -> usize {
        items.len()
    }

    #[test]
    fn test_fixed_arity_conversion() {
        let concat = fixed::<(&str, &str), _>(concat);
        assert_eq!(concat(vec![val("ab"), val("cd")]).unwrap(), val("abcd"));
        assert!(matches!(
            concat(vec![val("ab")]),
            Err(Error::ArityError { expected: 2, got: 1, .. })
        ));
        assert!(matches!(
            concat(vec![val("ab"), val(1)]),
            Err(Error::TypeError(_))
        ));

        let half = fixed::<(NumberType,), _>(half);
        assert_eq!(half(vec![val(5)]).unwrap(), val(2.5));

        let identity = fixed::<(Value,), _>(identity);
        assert_eq!(identity(vec![sym("x")]).unwrap(), sym("x"));

        let always = fixed::<(), _>(always);
        assert!(always(vec![val(1)]).is_err());
        assert_eq!(always(vec![]).unwrap(), val(true));
    }

    #[test]
    fn test_rest_parameters() {
        let sum = variadic::<(NumIter<'static>,), _>(sum);
        assert_eq!(sum(vec![]).unwrap(), val(0));
        assert_eq!(sum(vec![val(1), val(2), val(3)]).unwrap(), val(6));
        assert!(matches!(
            sum(vec![val(1), val("2")]),
            Err(Error::TypeError(msg)) if msg.contains("got string")
        ));

        let offset_count = variadic::<(NumberType, ValueIter<'static>), _>(offset_count);
        assert_eq!(
            offset_count(vec![val(10), sym("a"), val("b")]).unwrap(),
            val(12)
        );
        assert!(matches!(
            offset_count(vec![]),
            Err(Error::ArityError { expected: 1, got: 0, .. })
        ));
    }

    #[test]
    fn test_list_parameter() {
        let count = fixed::<(ValueIter<'static>,), _>(count);
        assert_eq!(count(vec![val([1, 2, 3])]).unwrap(), val(3));
        assert_eq!(count(vec![Value::Nil]).unwrap(), val(0));
        assert!(count(vec![val(1)]).is_err());
    }
}
