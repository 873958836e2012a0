//! Dotted property paths over typed beans and JSON values.
//!
//! Each bean type carries a [`TypeDescriptor`] built once (see [`bean!`])
//! that maps property names to typed accessors. Resolution walks a path
//! segment by segment and memoises the accessor chosen for every
//! `(runtime type, segment)` pair in a [`PropertyCache`] owned by the
//! caller, usually one request.

use std::{
    any::{Any, TypeId},
    borrow::Cow,
    collections::HashMap,
};

use serde_json::{Map, Value};
use shared::error::EngineError;

pub type ValueGetter = fn(&dyn Any) -> Option<Value>;
pub type ValueSetter = fn(&mut dyn Any, &Value) -> Result<(), String>;
pub type BeanGetter = for<'a> fn(&'a dyn Any) -> Option<&'a dyn Bean>;
pub type BeanGetterMut =
    for<'a> fn(&'a mut dyn Any, bool) -> Result<Option<&'a mut dyn Bean>, String>;

pub trait Bean: Any + Send {
    fn descriptor(&self) -> &'static TypeDescriptor;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Declared constructor used when assignment has to create an
/// intermediate object. `None` means the type cannot be created.
pub trait Instantiate: Sized {
    fn instantiate() -> Option<Self>;
}

pub trait PropertyValue: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self, String>;
}

/// A bean-typed field that may be absent.
pub trait NestedBean {
    fn bean(&self) -> Option<&dyn Bean>;
    fn bean_mut(&mut self, create: bool) -> Result<Option<&mut dyn Bean>, String>;
}

pub enum Accessor {
    Value { get: ValueGetter, set: ValueSetter },
    Nested { get: BeanGetter, get_mut: BeanGetterMut },
}

pub struct PropertyDescriptor {
    pub name: &'static str,
    pub accessor: Accessor,
}

impl PropertyDescriptor {
    pub fn value(name: &'static str, get: ValueGetter, set: ValueSetter) -> Self {
        Self {
            name,
            accessor: Accessor::Value { get, set },
        }
    }

    pub fn nested(name: &'static str, get: BeanGetter, get_mut: BeanGetterMut) -> Self {
        Self {
            name,
            accessor: Accessor::Nested { get, get_mut },
        }
    }
}

pub struct TypeDescriptor {
    type_name: &'static str,
    properties: Vec<PropertyDescriptor>,
}

impl TypeDescriptor {
    pub fn new(type_name: &'static str, properties: Vec<PropertyDescriptor>) -> Self {
        Self {
            type_name,
            properties,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|property| property.name == name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter()
    }
}

#[doc(hidden)]
pub fn type_mismatch(expected: &str) -> String {
    format!("accessor applied to a value that is not a {expected}")
}

/// Implements [`Bean`] and [`Instantiate`] for a struct.
///
/// `value` fields hold anything implementing [`PropertyValue`]; `nested`
/// fields hold `Option<T>` or `Option<Box<T>>` of another bean. The
/// `opaque` form declares a type without a constructor, so assignment
/// through a null field of that type fails.
///
/// ```ignore
/// bean!(Address { value street, nested state });
/// bean!(opaque Ledger { value balance });
/// ```
#[macro_export]
macro_rules! bean {
    (@property value $ty:ident $field:ident) => {
        $crate::property::PropertyDescriptor::value(
            stringify!($field),
            |any| {
                any.downcast_ref::<$ty>()
                    .map(|bean| $crate::property::PropertyValue::to_value(&bean.$field))
            },
            |any, value| {
                let bean = any
                    .downcast_mut::<$ty>()
                    .ok_or_else(|| $crate::property::type_mismatch(stringify!($ty)))?;
                bean.$field = $crate::property::PropertyValue::from_value(value)?;
                Ok(())
            },
        )
    };
    (@property nested $ty:ident $field:ident) => {
        $crate::property::PropertyDescriptor::nested(
            stringify!($field),
            |any| {
                any.downcast_ref::<$ty>()
                    .and_then(|bean| $crate::property::NestedBean::bean(&bean.$field))
            },
            |any, create| match any.downcast_mut::<$ty>() {
                Some(bean) => $crate::property::NestedBean::bean_mut(&mut bean.$field, create),
                None => Err($crate::property::type_mismatch(stringify!($ty))),
            },
        )
    };
    (@impl $ty:ident { $($kind:ident $field:ident),* }) => {
        impl $crate::property::Bean for $ty {
            fn descriptor(&self) -> &'static $crate::property::TypeDescriptor {
                static DESCRIPTOR: ::std::sync::OnceLock<$crate::property::TypeDescriptor> =
                    ::std::sync::OnceLock::new();
                DESCRIPTOR.get_or_init(|| {
                    $crate::property::TypeDescriptor::new(
                        stringify!($ty),
                        vec![$($crate::bean!(@property $kind $ty $field)),*],
                    )
                })
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
    (opaque $ty:ident { $($kind:ident $field:ident),* $(,)? }) => {
        $crate::bean!(@impl $ty { $($kind $field),* });

        impl $crate::property::Instantiate for $ty {
            fn instantiate() -> Option<Self> {
                None
            }
        }
    };
    ($ty:ident { $($kind:ident $field:ident),* $(,)? }) => {
        $crate::bean!(@impl $ty { $($kind $field),* });

        impl $crate::property::Instantiate for $ty {
            fn instantiate() -> Option<Self> {
                Some(<$ty as ::std::default::Default>::default())
            }
        }
    };
}

impl<T: Bean + Instantiate> NestedBean for Option<T> {
    fn bean(&self) -> Option<&dyn Bean> {
        self.as_ref().map(|bean| bean as &dyn Bean)
    }

    fn bean_mut(&mut self, create: bool) -> Result<Option<&mut dyn Bean>, String> {
        if self.is_none() && create {
            let created = T::instantiate().ok_or_else(|| no_constructor::<T>())?;
            *self = Some(created);
        }
        Ok(self.as_mut().map(|bean| bean as &mut dyn Bean))
    }
}

impl<T: Bean> Bean for Box<T> {
    fn descriptor(&self) -> &'static TypeDescriptor {
        (**self).descriptor()
    }

    fn as_any(&self) -> &dyn Any {
        (**self).as_any()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        (**self).as_any_mut()
    }
}

impl<T: Instantiate> Instantiate for Box<T> {
    fn instantiate() -> Option<Self> {
        T::instantiate().map(Box::new)
    }
}

fn no_constructor<T>() -> String {
    let name = std::any::type_name::<T>();
    let short = name.trim_end_matches('>').rsplit("::").next().unwrap_or(name);
    format!("{short} has no declared constructor")
}

impl PropertyValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(String::new()),
            Value::String(text) => Ok(text.clone()),
            Value::Number(number) => Ok(number.to_string()),
            Value::Bool(flag) => Ok(flag.to_string()),
            other => Err(format!("cannot convert {other} to text")),
        }
    }
}

macro_rules! integer_property {
    ($($ty:ty),*) => {
        $(
            impl PropertyValue for $ty {
                fn to_value(&self) -> Value {
                    Value::from(*self)
                }

                fn from_value(value: &Value) -> Result<Self, String> {
                    match value {
                        Value::Number(number) => number
                            .as_i64()
                            .and_then(|raw| <$ty>::try_from(raw).ok())
                            .ok_or_else(|| format!("{number} is out of range")),
                        Value::String(text) => text
                            .trim()
                            .parse::<$ty>()
                            .map_err(|_| format!("'{text}' is not a whole number")),
                        other => Err(format!("cannot convert {other} to a number")),
                    }
                }
            }
        )*
    };
}

integer_property!(i32, i64, u32, u64, usize);

impl PropertyValue for f64 {
    fn to_value(&self) -> Value {
        Value::from(*self)
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Number(number) => number
                .as_f64()
                .ok_or_else(|| format!("{number} is not representable")),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("'{text}' is not a number")),
            other => Err(format!("cannot convert {other} to a number")),
        }
    }
}

impl PropertyValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(false),
            Value::Bool(flag) => Ok(*flag),
            Value::Number(number) => Ok(number.as_i64().unwrap_or_default() != 0),
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "" | "false" | "off" | "no" | "0" => Ok(false),
                "true" | "on" | "yes" | "1" => Ok(true),
                _ => Err(format!("'{text}' is not a boolean")),
            },
            other => Err(format!("cannot convert {other} to a boolean")),
        }
    }
}

impl PropertyValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl<T: PropertyValue> PropertyValue for Option<T> {
    fn to_value(&self) -> Value {
        self.as_ref().map(T::to_value).unwrap_or(Value::Null)
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            Value::String(text) if text.trim().is_empty() => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: PropertyValue> PropertyValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(T::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            single => T::from_value(single).map(|item| vec![item]),
        }
    }
}

/// Accessors chosen per `(runtime type, segment)`, scoped to one pass.
#[derive(Default)]
pub struct PropertyCache {
    entries: HashMap<TypeId, HashMap<String, &'static PropertyDescriptor>>,
    misses: usize,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of descriptor lookups that were not served from the cache.
    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.misses = 0;
    }

    fn lookup(
        &mut self,
        bean: &dyn Bean,
        segment: &str,
    ) -> Result<&'static PropertyDescriptor, EngineError> {
        let type_id = Any::type_id(bean.as_any());
        if let Some(found) = self
            .entries
            .get(&type_id)
            .and_then(|by_name| by_name.get(segment))
        {
            return Ok(found);
        }

        let descriptor: &'static TypeDescriptor = bean.descriptor();
        let property = candidate_names(segment)
            .iter()
            .find_map(|name| descriptor.property(name))
            .ok_or_else(|| EngineError::PropertyNotFound {
                property: segment.to_string(),
                type_name: descriptor.type_name(),
            })?;

        self.misses += 1;
        self.entries
            .entry(type_id)
            .or_default()
            .insert(segment.to_string(), property);
        Ok(property)
    }
}

// `firstName`, `getFirstName` and `isActive` all map onto snake_case fields.
fn candidate_names(segment: &str) -> Vec<String> {
    let mut names = vec![segment.to_string()];
    let snake = to_snake_case(segment);
    for candidate in [
        Some(snake.clone()),
        snake.strip_prefix("get_").map(str::to_string),
        snake.strip_prefix("is_").map(str::to_string),
    ]
    .into_iter()
    .flatten()
    {
        if !candidate.is_empty() && !names.contains(&candidate) {
            names.push(candidate);
        }
    }
    names
}

fn to_snake_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    for (index, ch) in segment.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn split_path(path: &str) -> Result<Vec<&str>, EngineError> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(EngineError::binding(path, "malformed property path"));
    }
    Ok(segments)
}

/// Rejects paths with empty segments such as `a..b`.
pub fn validate_path(path: &str) -> Result<(), EngineError> {
    split_path(path).map(|_| ())
}

enum Cursor<'a> {
    Bean(&'a dyn Bean),
    Value(Cow<'a, Value>),
}

/// Resolves `path` against a bean. A null intermediate yields
/// `Value::Null`; a segment naming nothing on a non-null bean fails with
/// `PropertyNotFound`.
pub fn resolve(
    root: &dyn Bean,
    path: &str,
    cache: &mut PropertyCache,
) -> Result<Value, EngineError> {
    walk(Cursor::Bean(root), path, cache)
}

/// Resolves `path` against a JSON value. Missing map keys read as null.
pub fn resolve_value(
    root: &Value,
    path: &str,
    cache: &mut PropertyCache,
) -> Result<Value, EngineError> {
    walk(Cursor::Value(Cow::Borrowed(root)), path, cache)
}

fn walk(
    mut cursor: Cursor<'_>,
    path: &str,
    cache: &mut PropertyCache,
) -> Result<Value, EngineError> {
    for segment in split_path(path)? {
        cursor = match cursor {
            Cursor::Bean(bean) => {
                let property = cache.lookup(bean, segment)?;
                match &property.accessor {
                    Accessor::Value { get, .. } => {
                        Cursor::Value(Cow::Owned(get(bean.as_any()).unwrap_or(Value::Null)))
                    }
                    Accessor::Nested { get, .. } => match get(bean.as_any()) {
                        Some(nested) => Cursor::Bean(nested),
                        None => return Ok(Value::Null),
                    },
                }
            }
            Cursor::Value(value) => {
                if value.is_null() {
                    return Ok(Value::Null);
                }
                Cursor::Value(step_value(value, segment)?)
            }
        };
    }

    Ok(match cursor {
        Cursor::Bean(bean) => to_value(bean),
        Cursor::Value(value) => value.into_owned(),
    })
}

fn step_value<'a>(value: Cow<'a, Value>, segment: &str) -> Result<Cow<'a, Value>, EngineError> {
    match value {
        Cow::Borrowed(Value::Object(map)) => Ok(map
            .get(segment)
            .map(Cow::Borrowed)
            .unwrap_or(Cow::Owned(Value::Null))),
        Cow::Borrowed(Value::Array(items)) => Ok(index(items, segment)?
            .map(Cow::Borrowed)
            .unwrap_or(Cow::Owned(Value::Null))),
        Cow::Owned(Value::Object(mut map)) => {
            Ok(Cow::Owned(map.remove(segment).unwrap_or(Value::Null)))
        }
        Cow::Owned(Value::Array(items)) => {
            Ok(Cow::Owned(index(&items, segment)?.cloned().unwrap_or(Value::Null)))
        }
        other => Err(EngineError::PropertyNotFound {
            property: segment.to_string(),
            type_name: value_kind(&other),
        }),
    }
}

fn index<'a>(items: &'a [Value], segment: &str) -> Result<Option<&'a Value>, EngineError> {
    let position = segment
        .parse::<usize>()
        .map_err(|_| EngineError::PropertyNotFound {
            property: segment.to_string(),
            type_name: "array",
        })?;
    Ok(items.get(position))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Snapshot of a bean as a JSON object, nested beans included.
pub fn to_value(bean: &dyn Bean) -> Value {
    let mut map = Map::new();
    for property in bean.descriptor().properties() {
        let value = match &property.accessor {
            Accessor::Value { get, .. } => get(bean.as_any()).unwrap_or(Value::Null),
            Accessor::Nested { get, .. } => get(bean.as_any()).map(to_value).unwrap_or(Value::Null),
        };
        map.insert(property.name.to_string(), value);
    }
    Value::Object(map)
}

/// Assigns `value` at `path`, creating null intermediates through their
/// declared constructors.
pub fn assign(
    root: &mut dyn Bean,
    path: &str,
    value: Value,
    cache: &mut PropertyCache,
) -> Result<(), EngineError> {
    let segments = split_path(path)?;
    let mut current: &mut dyn Bean = root;

    for (position, segment) in segments.iter().enumerate() {
        let property = cache.lookup(&*current, segment)?;
        let is_last = position + 1 == segments.len();
        let bean = current;

        match &property.accessor {
            Accessor::Value { set, .. } if is_last => {
                return set(bean.as_any_mut(), &value)
                    .map_err(|reason| EngineError::binding(path, reason));
            }
            Accessor::Value { get, set } => {
                let mut holder = get(bean.as_any()).unwrap_or(Value::Null);
                assign_json(&mut holder, &segments[position + 1..], value)
                    .map_err(|reason| EngineError::binding(path, reason))?;
                return set(bean.as_any_mut(), &holder)
                    .map_err(|reason| EngineError::binding(path, reason));
            }
            Accessor::Nested { .. } if is_last => {
                return Err(EngineError::binding(
                    path,
                    format!("'{segment}' is an object and cannot hold a plain value"),
                ));
            }
            Accessor::Nested { get_mut, .. } => {
                current = match get_mut(bean.as_any_mut(), true) {
                    Ok(Some(next)) => next,
                    Ok(None) => {
                        return Err(EngineError::binding(path, format!("'{segment}' is null")))
                    }
                    Err(reason) => return Err(EngineError::binding(path, reason)),
                };
            }
        }
    }

    Err(EngineError::binding(path, "malformed property path"))
}

/// Assigns into a JSON tree, turning null intermediates into objects.
pub fn assign_value(root: &mut Value, path: &str, value: Value) -> Result<(), EngineError> {
    let segments = split_path(path)?;
    assign_json(root, &segments, value).map_err(|reason| EngineError::binding(path, reason))
}

fn assign_json(target: &mut Value, segments: &[&str], value: Value) -> Result<(), String> {
    let Some((last, parents)) = segments.split_last() else {
        *target = value;
        return Ok(());
    };

    let mut current = target;
    for segment in parents {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
            _ => return Err(format!("'{segment}' is not an object")),
        };
    }

    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        _ => Err(format!("'{last}' has no object to live in")),
    }
}

#[cfg(test)]
#[path = "tests/property_tests.rs"]
mod tests;
