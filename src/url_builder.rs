//! Builds the request URL of an operation call.
//!
//! Placeholders `{name}` in the base URI and the path template are replaced
//! with serialized URL parameters (percent-encoded like
//! `encodeURIComponent` unless the parameter skips encoding). A path that is
//! itself an absolute URL, such as a server-provided next-page link,
//! replaces the base URI. Query parameters are merged with any query string
//! already present, and the final query string is written verbatim so that
//! pre-encoded values are never decoded or re-encoded.

use crate::operation::{
    get_operation_argument_value, CollectionFormat, OperationArguments, OperationParameter,
    OperationSpec,
};
use crate::mapper::MapperType;
use crate::Result;
use indexmap::IndexMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};
use std::collections::HashSet;
use url::Url;

/// Characters `encodeURIComponent` escapes.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, PartialEq)]
enum QueryValue {
    Single(String),
    Multiple(Vec<String>),
}

/// Percent-encodes a URI component.
pub(crate) fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// Resolves the full request URL for one call of `spec`.
///
/// # Errors
///
/// Returns [`crate::Error::Validation`] if a parameter fails serialization
/// and [`crate::Error::InvalidUrl`] if the result is not a valid URL.
///
/// # Examples
///
/// ```
/// use http::Method;
/// use restline::mapper::{Mapper, MapperRegistry};
/// use restline::operation::{CollectionFormat, OperationArguments, OperationParameter, OperationSpec};
/// use restline::serializer::Serializer;
/// use restline::url_builder::get_request_url;
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), restline::Error> {
/// let serializer = Serializer::new(Arc::new(MapperRegistry::empty()), false);
/// let spec = OperationSpec::new(Method::GET, serializer)
///     .path("/files/{name}")
///     .url_parameter(OperationParameter::new("name", Mapper::string().named("name").required()))
///     .query_parameter(
///         OperationParameter::new("tags", Mapper::sequence(Mapper::string()).named("tags"))
///             .collection_format(CollectionFormat::Csv),
///     );
/// let args = OperationArguments::new()
///     .with("name", "a b")?
///     .with("tags", ["x", "y"])?;
///
/// let url = get_request_url("https://example.com", &spec, &args, None)?;
/// assert_eq!(url, "https://example.com/files/a%20b?tags=x,y");
/// # Ok(())
/// # }
/// ```
pub fn get_request_url(
    base_uri: &str,
    spec: &OperationSpec,
    arguments: &OperationArguments,
    fallback: Option<&Map<String, Value>>,
) -> Result<String> {
    let replacements = url_replacements(spec, arguments, fallback)?;
    let mut request_url = replace_all(base_uri, &replacements);

    if let Some(path) = spec.path.as_deref().filter(|p| !p.is_empty()) {
        let path = replace_all(path, &replacements);
        request_url = if path.contains("://") {
            path
        } else {
            append_path(&request_url, &path)?
        };
    }

    let (query, sequence_params) = query_parameters(spec, arguments, fallback)?;
    append_query_params(&request_url, query, &sequence_params)
}

fn serialize_parameter(
    spec: &OperationSpec,
    arguments: &OperationArguments,
    parameter: &OperationParameter,
    fallback: Option<&Map<String, Value>>,
) -> Result<Option<Value>> {
    let value = get_operation_argument_value(arguments, parameter, fallback);
    spec.serializer.serialize(
        &parameter.mapper,
        value.as_ref(),
        &parameter.path_string(),
        &arguments.options.serializer_options,
    )
}

fn parameter_name(parameter: &OperationParameter) -> String {
    match parameter.mapper.serialized_name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => parameter.path_string(),
    }
}

fn url_replacements(
    spec: &OperationSpec,
    arguments: &OperationArguments,
    fallback: Option<&Map<String, Value>>,
) -> Result<Vec<(String, String)>> {
    let mut replacements = Vec::with_capacity(spec.url_parameters.len());
    for parameter in &spec.url_parameters {
        let serialized = serialize_parameter(spec, arguments, parameter, fallback)?;
        let text = parameter_text(serialized.as_ref());
        let text = if parameter.skip_encoding {
            text
        } else {
            encode_uri_component(&text)
        };
        replacements.push((format!("{{{}}}", parameter_name(parameter)), text));
    }
    Ok(replacements)
}

fn replace_all(input: &str, replacements: &[(String, String)]) -> String {
    replacements
        .iter()
        .fold(input.to_string(), |acc, (search, replace)| acc.replace(search, replace))
}

fn append_path(url: &str, path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(url.to_string());
    }

    let mut parsed = Url::parse(url)?;
    let mut new_path = parsed.path().to_string();
    if !new_path.ends_with('/') {
        new_path.push('/');
    }
    let path = path.strip_prefix('/').unwrap_or(path);

    match path.split_once('?') {
        Some((path, search)) => {
            new_path.push_str(path);
            if !search.is_empty() {
                let query = match parsed.query() {
                    Some(existing) if !existing.is_empty() => format!("{}&{}", existing, search),
                    _ => search.to_string(),
                };
                parsed.set_query(Some(&query));
            }
        }
        None => new_path.push_str(path),
    }

    parsed.set_path(&new_path);
    Ok(parsed.to_string())
}

fn query_parameters(
    spec: &OperationSpec,
    arguments: &OperationArguments,
    fallback: Option<&Map<String, Value>>,
) -> Result<(IndexMap<String, QueryValue>, HashSet<String>)> {
    let mut result = IndexMap::new();
    let mut sequence_params = HashSet::new();

    for parameter in &spec.query_parameters {
        if let (MapperType::Sequence { .. }, Some(name)) =
            (&parameter.mapper.kind, parameter.mapper.serialized_name.as_deref())
        {
            if !name.is_empty() {
                sequence_params.insert(name.to_string());
            }
        }

        let value = get_operation_argument_value(arguments, parameter, fallback);
        let present = value.as_ref().is_some_and(|v| !v.is_null());
        if !present && !parameter.mapper.required {
            continue;
        }

        let serialized = spec.serializer.serialize(
            &parameter.mapper,
            value.as_ref(),
            &parameter.path_string(),
            &arguments.options.serializer_options,
        )?;
        let format = parameter.collection_format;

        let mut query_value = match &serialized {
            Some(Value::Array(items)) => {
                QueryValue::Multiple(items.iter().map(|item| parameter_text(Some(item))).collect())
            }
            other => QueryValue::Single(parameter_text(other.as_ref())),
        };

        let is_empty = match &query_value {
            QueryValue::Single(s) => s.is_empty(),
            QueryValue::Multiple(items) => items.is_empty(),
        };
        if format == Some(CollectionFormat::Multi) && is_empty {
            continue;
        }

        query_value = join_items(
            query_value,
            format,
            &[CollectionFormat::Ssv, CollectionFormat::Tsv],
        );

        if !parameter.skip_encoding {
            query_value = match query_value {
                QueryValue::Single(s) => QueryValue::Single(encode_uri_component(&s)),
                QueryValue::Multiple(items) => QueryValue::Multiple(
                    items.iter().map(|item| encode_uri_component(item)).collect(),
                ),
            };
        }

        // CSV and pipes are joined after encoding so the delimiter stays literal.
        query_value = join_items(
            query_value,
            format,
            &[CollectionFormat::Csv, CollectionFormat::Pipes],
        );

        result.insert(parameter_name(parameter), query_value);
    }

    Ok((result, sequence_params))
}

fn join_items(
    value: QueryValue,
    format: Option<CollectionFormat>,
    joined_formats: &[CollectionFormat],
) -> QueryValue {
    match (value, format) {
        (QueryValue::Multiple(items), Some(format)) if joined_formats.contains(&format) => {
            QueryValue::Single(items.join(format.delimiter()))
        }
        (value, _) => value,
    }
}

/// Splits an existing query string without decoding it.
fn simple_parse_query_params(query: &str) -> IndexMap<String, QueryValue> {
    let mut result: IndexMap<String, QueryValue> = IndexMap::new();
    if query.is_empty() {
        return result;
    }

    for pair in query.split('&') {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = value.to_string();
        match result.get_mut(name) {
            Some(QueryValue::Multiple(items)) => items.push(value),
            Some(QueryValue::Single(existing)) if !existing.is_empty() => {
                let first = std::mem::take(existing);
                result.insert(name.to_string(), QueryValue::Multiple(vec![first, value]));
            }
            _ => {
                result.insert(name.to_string(), QueryValue::Single(value));
            }
        }
    }
    result
}

fn append_query_params(
    url: &str,
    query: IndexMap<String, QueryValue>,
    sequence_params: &HashSet<String>,
) -> Result<String> {
    if query.is_empty() {
        return Ok(url.to_string());
    }

    let mut parsed = Url::parse(url)?;
    let mut combined = simple_parse_query_params(parsed.query().unwrap_or_default());

    for (name, value) in query {
        let merged = match (combined.get(&name), value) {
            (Some(QueryValue::Multiple(existing)), QueryValue::Multiple(values)) => {
                let mut merged: Vec<String> = Vec::with_capacity(existing.len() + values.len());
                for item in existing.iter().cloned().chain(values) {
                    if !merged.contains(&item) {
                        merged.push(item);
                    }
                }
                QueryValue::Multiple(merged)
            }
            (Some(QueryValue::Multiple(existing)), QueryValue::Single(value)) => {
                let mut merged = existing.clone();
                merged.push(value);
                QueryValue::Multiple(merged)
            }
            (Some(QueryValue::Single(existing)), QueryValue::Multiple(mut values))
                if !existing.is_empty() =>
            {
                values.insert(0, existing.clone());
                QueryValue::Multiple(values)
            }
            (Some(QueryValue::Single(existing)), QueryValue::Single(value))
                if !existing.is_empty() && sequence_params.contains(&name) =>
            {
                QueryValue::Multiple(vec![existing.clone(), value])
            }
            (_, value) => value,
        };
        combined.insert(name, merged);
    }

    let mut pieces = Vec::new();
    for (name, value) in &combined {
        match value {
            QueryValue::Single(value) => pieces.push(format!("{}={}", name, value)),
            QueryValue::Multiple(values) => {
                pieces.extend(values.iter().map(|value| format!("{}={}", name, value)));
            }
        }
    }

    if pieces.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.set_query(Some(&pieces.join("&")));
    }
    Ok(parsed.to_string())
}

/// Text of a serialized parameter value as it appears in a URL.
fn parameter_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| parameter_text(Some(item)))
            .collect::<Vec<_>>()
            .join(","),
        Some(other) => other.to_string(),
    }
}
