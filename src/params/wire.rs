//! Decoding search parameters from query-string pairs, `key:value;...`
//! strings and JSON objects.

use tracing::trace;

use super::{FieldList, OrderBy, PropertyFilter, SearchParameters, SortOrder};
use crate::error::{GraphError, Result};

/// Applies one wire parameter. Unknown keys are ignored.
pub fn resolve_parameter(params: &mut SearchParameters, key: &str, value: &str) -> Result<()> {
    match key {
        "q" | "query" => params.query = Some(value.to_owned()),
        "ids" => {
            params.ids = split_list(value)
                .map(|id| number::<u64>(key, id))
                .collect::<Result<_>>()?;
        }
        "uuids" => params.uuids = split_list(value).map(str::to_owned).collect(),
        "count" => params.count = true,
        "start" => params.start = Some(number(key, value)?),
        "limit" => params.limit = Some(number(key, value)?),
        "page" => params.page = Some(number(key, value)?),
        "locale" => params.locale = Some(value.to_owned()),
        "depth" => params.depth = Some(number(key, value)?),
        "order" => {
            for clause in value.split(',').filter(|c| !c.trim().is_empty()) {
                params.order_by.push(parse_order(clause));
            }
        }
        "filter" | "filters" => {
            for filter in split_list(value) {
                params.filters.push(PropertyFilter::parse(filter)?);
            }
        }
        "fields" => {
            for field in FieldList::parse(value)?.iter() {
                params.fields.push(field.clone());
            }
        }
        "returns" | "return" => params.returns = split_list(value).map(str::to_owned).collect(),
        _ => trace!(key, "ignoring unknown search parameter"),
    }
    Ok(())
}

/// Decodes query-string pairs and finishes resolution.
pub fn from_query_pairs<'a, I>(pairs: I) -> Result<SearchParameters>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut params = SearchParameters::default();
    for (key, value) in pairs {
        resolve_parameter(&mut params, key, value)?;
    }
    finish(params)
}

/// Decodes a whole parameter string: a JSON object, or `key:value` pairs
/// separated by `;` (each split at its first `:`).
pub fn parse(input: &str) -> Result<SearchParameters> {
    let input = input.trim();
    if input.starts_with('{') {
        let params: SearchParameters = serde_json::from_str(input)
            .map_err(|err| GraphError::InvalidArgument(format!("{input} is not parsable: {err}")))?;
        return finish(params);
    }
    let mut params = SearchParameters::default();
    for pair in input.split(';').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair.split_once(':').unwrap_or((pair, ""));
        resolve_parameter(&mut params, key.trim(), value.trim())?;
    }
    finish(params)
}

/// Defaults applied after any decoding: all fields, resolved pagination.
pub fn finish(mut params: SearchParameters) -> Result<SearchParameters> {
    if params.fields.is_empty() {
        params.fields = FieldList::all();
    }
    params.resolve()?;
    Ok(params)
}

fn parse_order(clause: &str) -> OrderBy {
    // a '+' arrives as ' ' once the query string is decoded
    if let Some(field) = clause.strip_prefix('-') {
        OrderBy::desc(field.trim())
    } else {
        let field = clause
            .strip_prefix('+')
            .or_else(|| clause.strip_prefix(' '))
            .unwrap_or(clause);
        OrderBy {
            field: field.trim().to_owned(),
            dir: SortOrder::Asc,
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GraphError::InvalidArgument(format!("'{value}' is not a valid {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Filter;
    use crate::value::Value;

    #[test]
    fn pairs_strings_and_json_agree() {
        let from_pairs = from_query_pairs([
            ("q", "ada"),
            ("limit", "10"),
            ("page", "3"),
            ("order", "-age, name"),
            ("filter", "age:>=18"),
            ("fields", "name,children.{name}"),
        ])
        .expect("pairs");
        let from_string =
            parse("q:ada;limit:10;page:3;order:-age, name;filter:age:>=18;fields:name,children.{name}")
                .expect("string");
        let from_json = parse(
            r#"{"query":"ada","limit":10,"page":3,
                "orderBy":[{"field":"age","dir":"desc"},{"field":"name"}],
                "filters":[{"field":"age","type":"greaterThan","value":18,"including":true}],
                "fields":"name,children.{name}"}"#,
        )
        .expect("json");

        assert_eq!(from_pairs, from_string);
        assert_eq!(from_pairs, from_json);
        assert_eq!(from_pairs.start, Some(20));
        assert_eq!(from_pairs.order_by[0], OrderBy::desc("age"));
        assert_eq!(
            from_pairs.filters[0].filter,
            Filter::GreaterThan {
                value: Value::Int(18),
                including: true
            }
        );
    }

    #[test]
    fn empty_fields_default_to_all() {
        let params = parse("ids:1,2").expect("parse");
        assert!(params.fields.is_all());
        assert_eq!(params.ids, vec![1, 2]);
    }

    #[test]
    fn unknown_keys_are_ignored_and_bad_numbers_rejected() {
        assert!(parse("colour:red").is_ok());
        assert!(matches!(
            parse("limit:ten"),
            Err(GraphError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse("page:18446744073709551615;limit:2"),
            Err(GraphError::InvalidArgument(_))
        ));
    }

    #[test]
    fn plus_prefix_sorts_ascending() {
        let params = from_query_pairs([("order", "+name, age")]).expect("pairs");
        assert_eq!(params.order_by, vec![OrderBy::asc("name"), OrderBy::asc("age")]);
    }
}
