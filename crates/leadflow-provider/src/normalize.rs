//! Provider response normalization.
//!
//! Providers disagree on almost everything: where the item array lives, whether
//! an item is a bare tax id or an object, how deep an object nests its fields,
//! and which key carries the total. Every heuristic lives here so the rest of
//! the crate only sees [`LeadSummary`] and [`SearchPage`].

use leadflow_core::types::digits_only;
use leadflow_core::{LeadDetail, LeadSummary, SearchPage, TaxId};
use serde_json::Value;

/// Keys that may hold the item array, in lookup order.
const ITEM_KEYS: [&str; 6] = ["cnpjs", "data", "empresas", "results", "items", "resultados"];

/// Paths that may hold the total, in lookup order.
const TOTAL_PATHS: [&str; 7] = [
    "total",
    "total_count",
    "totalCount",
    "quantidade",
    "count",
    "meta.total",
    "paginacao.total",
];

/// Wrappers an item object may nest its fields under, searched after the item itself.
const NESTED_KEYS: [&str; 4] = ["empresa", "dados", "data", "company"];

const NAME_PATHS: [&str; 5] = ["razao_social", "nome_fantasia", "company_name", "nome", "name"];
const SEGMENT_PATHS: [&str; 5] = [
    "atividade_principal.descricao",
    "atividade_principal",
    "cnae_descricao",
    "segmento",
    "segment",
];
const TAX_ID_PATHS: [&str; 3] = ["cnpj", "tax_id", "cnpj_completo"];
const EMAIL_PATHS: [&str; 4] = ["email", "contato_email", "emails", "correio_eletronico"];
const PHONE_PATHS: [&str; 4] = ["telefone", "contato_telefonico", "telefones", "phone"];
const CITY_PATHS: [&str; 4] = ["municipio", "endereco.municipio", "cidade", "city"];
const REGION_PATHS: [&str; 4] = ["uf", "endereco.uf", "estado", "region"];
const STATUS_PATHS: [&str; 4] = [
    "situacao_cadastral.situacao_atual",
    "situacao_cadastral",
    "situacao",
    "status",
];

/// Parse a successful search body into a page.
///
/// Leads beyond `page_size` are dropped. When no total is reported, the number
/// of items the provider returned stands in for it.
#[must_use]
pub fn parse_search_response(body: &Value, page: u32, page_size: u32) -> SearchPage {
    let mut leads = extract_leads(body);
    let returned = leads.len() as u64;
    leads.truncate(page_size as usize);

    let total = resolve_total(body).unwrap_or(returned);

    SearchPage {
        leads,
        total,
        has_more: SearchPage::compute_has_more(total, page, page_size),
        page,
        page_size,
    }
}

/// Normalize every item found in the body.
#[must_use]
pub fn extract_leads(body: &Value) -> Vec<LeadSummary> {
    find_items(body)
        .map(|items| items.iter().filter_map(normalize_lead).collect())
        .unwrap_or_default()
}

/// Resolve the total-count field, accepting numbers and numeric strings.
#[must_use]
pub fn resolve_total(body: &Value) -> Option<u64> {
    TOTAL_PATHS
        .iter()
        .find_map(|path| lookup(body, path).and_then(as_count))
}

/// Normalize one item, either a bare tax id string or an object.
///
/// Bare strings that are not valid tax ids are dropped.
#[must_use]
pub fn normalize_lead(item: &Value) -> Option<LeadSummary> {
    match item {
        Value::String(raw) => TaxId::parse(raw).ok().map(|t| LeadSummary::from_tax_id(&t)),
        Value::Number(n) => TaxId::parse(&n.to_string())
            .ok()
            .map(|t| LeadSummary::from_tax_id(&t)),
        Value::Object(_) => Some(normalize_object(item)),
        _ => None,
    }
}

/// Build a detail from a successful detail body.
///
/// The record may be wrapped in a nesting key; the tax id requested wins over
/// whatever the body reports.
#[must_use]
pub fn parse_detail(tax_id: &TaxId, body: &Value) -> LeadDetail {
    let mut summary = normalize_object(body);
    summary.tax_id = Some(tax_id.as_str().to_string());
    summary.formatted_tax_id = Some(tax_id.formatted());

    LeadDetail {
        tax_id: tax_id.clone(),
        summary,
        raw: body.clone(),
    }
}

fn find_items(body: &Value) -> Option<&Vec<Value>> {
    if let Value::Array(items) = body {
        return Some(items);
    }
    for key in ITEM_KEYS {
        match body.get(key) {
            Some(Value::Array(items)) => return Some(items),
            // One level of wrapping, e.g. {"data": {"cnpjs": [...]}}
            Some(inner @ Value::Object(_)) => {
                if let Some(items) = ITEM_KEYS
                    .iter()
                    .find_map(|k| inner.get(*k).and_then(Value::as_array))
                {
                    return Some(items);
                }
            }
            _ => {}
        }
    }
    None
}

fn normalize_object(item: &Value) -> LeadSummary {
    let containers: Vec<&Value> = std::iter::once(item)
        .chain(NESTED_KEYS.iter().filter_map(|k| item.get(*k)).filter(|v| v.is_object()))
        .collect();

    let field = |paths: &[&str]| -> Option<String> {
        containers
            .iter()
            .find_map(|c| paths.iter().find_map(|p| lookup(c, p).and_then(as_text)))
    };

    let tax_id = field(&TAX_ID_PATHS).and_then(|raw| TaxId::parse(&raw).ok());

    LeadSummary {
        company_name: field(&NAME_PATHS),
        segment: field(&SEGMENT_PATHS),
        formatted_tax_id: tax_id.as_ref().map(TaxId::formatted),
        tax_id: tax_id.map(|t| t.as_str().to_string()),
        email: field(&EMAIL_PATHS).map(|e| e.to_lowercase()),
        phone: field(&PHONE_PATHS),
        city: field(&CITY_PATHS),
        region: field(&REGION_PATHS).map(|r| r.to_uppercase()),
        status: field(&STATUS_PATHS),
    }
}

/// Follow a dotted path through nested objects.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

/// Render a value as display text.
///
/// Arrays yield their first renderable element; objects are searched for the
/// usual descriptive keys.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(as_text),
        Value::Object(map) => {
            if let (Some(ddd), Some(numero)) = (map.get("ddd"), map.get("numero")) {
                let ddd = as_text(ddd)?;
                let numero = as_text(numero)?;
                return Some(format!("({ddd}) {numero}"));
            }
            ["completo", "descricao", "email", "situacao_atual", "numero", "nome", "valor"]
                .iter()
                .find_map(|k| map.get(*k).and_then(as_text))
        }
        Value::Bool(_) | Value::Null => None,
    }
}

/// Largest total a job can store.
pub const MAX_TOTAL: u64 = i64::MAX as u64;

/// Counts saturate at [`MAX_TOTAL`].
#[allow(clippy::cast_precision_loss)]
fn as_count(value: &Value) -> Option<u64> {
    let count = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.trunc().min(MAX_TOTAL as f64) as u64)
        }),
        Value::String(s) => {
            let digits = digits_only(s);
            // Accept "1.234" and "1,234" style thousands separators, nothing else
            let clean = s.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | ' '));
            // Only overflow can fail to parse a run of digits
            (clean && !digits.is_empty()).then(|| digits.parse().unwrap_or(MAX_TOTAL))
        }
        _ => None,
    };
    count.map(|c| c.min(MAX_TOTAL))
}
