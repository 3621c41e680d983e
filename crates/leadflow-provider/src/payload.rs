//! Provider search payload construction.
//!
//! Maps a normalized [`LeadQuery`] onto the provider's search body. Filters
//! whose value is empty or default are left out entirely: the provider treats
//! an absent key as "no restriction" but an empty list as "match nothing".

use leadflow_core::{EstablishmentFilter, LeadQuery, RegimeFilter};
use serde_json::{json, Map, Value};

/// Build the JSON body for a search call.
#[must_use]
pub fn build_search_payload(query: &LeadQuery, quantity: u32) -> Value {
    let mut body = Map::new();

    if !query.terms.is_empty() {
        body.insert(
            "busca_textual".to_string(),
            json!([{
                "texto": query.terms,
                "tipo_busca": "radical",
                "razao_social": true,
                "nome_fantasia": true,
            }]),
        );
    }

    insert_list(&mut body, "codigo_atividade_principal", &query.activity_codes);
    if query.include_secondary_activity && !query.activity_codes.is_empty() {
        body.insert("incluir_atividade_secundaria".to_string(), Value::Bool(true));
    }
    insert_list(
        &mut body,
        "codigo_atividade_secundaria",
        &query.secondary_activity_codes,
    );
    insert_list(&mut body, "codigo_natureza_juridica", &query.legal_nature_codes);

    if let Some(status) = query.company_status {
        body.insert(
            "situacao_cadastral".to_string(),
            json!([status.provider_code()]),
        );
    }

    insert_list(&mut body, "uf", &query.regions);
    insert_list(&mut body, "municipio", &query.cities);
    insert_list(&mut body, "bairro", &query.neighbourhoods);
    insert_list(&mut body, "cep", &query.postal_codes);
    insert_list(&mut body, "ddd", &query.area_codes);
    insert_list(&mut body, "cnpj", &query.tax_ids);

    if !query.registration.is_empty() {
        let mut window = Map::new();
        if let Some(start) = query.registration.start {
            window.insert("inicio".to_string(), json!(start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = query.registration.end {
            window.insert("fim".to_string(), json!(end.format("%Y-%m-%d").to_string()));
        }
        if let Some(days) = query.registration.last_days {
            window.insert("ultimos_dias".to_string(), json!(days));
        }
        body.insert("data_abertura".to_string(), Value::Object(window));
    }

    if !query.capital.is_empty() {
        let mut range = Map::new();
        if let Some(min) = query.capital.min {
            range.insert("minimo".to_string(), json!(min));
        }
        if let Some(max) = query.capital.max {
            range.insert("maximo".to_string(), json!(max));
        }
        body.insert("capital_social".to_string(), Value::Object(range));
    }

    if let Some(regime) = regime_filter(query.mei) {
        body.insert("mei".to_string(), regime);
    }
    if let Some(regime) = regime_filter(query.simples) {
        body.insert("simples".to_string(), regime);
    }

    let mut extra = Map::new();
    match query.establishment {
        EstablishmentFilter::Any => {}
        EstablishmentFilter::HeadquartersOnly => {
            extra.insert("somente_matriz".to_string(), Value::Bool(true));
        }
        EstablishmentFilter::BranchOnly => {
            extra.insert("somente_filial".to_string(), Value::Bool(true));
        }
    }
    let flags = [
        ("com_email", query.contact.has_email),
        ("com_telefone", query.contact.has_phone),
        ("somente_celular", query.contact.mobile_only),
        ("somente_fixo", query.contact.landline_only),
    ];
    for (key, enabled) in flags {
        if enabled {
            extra.insert(key.to_string(), Value::Bool(true));
        }
    }
    if !extra.is_empty() {
        body.insert("mais_filtros".to_string(), Value::Object(extra));
    }

    body.insert("limite".to_string(), json!(quantity));
    body.insert("pagina".to_string(), json!(query.page.max(1)));

    Value::Object(body)
}

fn insert_list(body: &mut Map<String, Value>, key: &str, values: &[String]) {
    if !values.is_empty() {
        body.insert(key.to_string(), json!(values));
    }
}

fn regime_filter(filter: RegimeFilter) -> Option<Value> {
    match filter {
        RegimeFilter::Any => None,
        RegimeFilter::OptedIn => Some(json!({ "optante": true })),
        RegimeFilter::ExcludeOptedIn => Some(json!({ "excluir_optante": true })),
    }
}
