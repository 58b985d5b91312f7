//! Graph construction from raw stage results.
//!
//! Each `(endpoint_id, capability)` pair resolves to a shape mapper: a
//! static function turning one opaque payload into nodes and edges. Every
//! capability has a default mapper; endpoint-specific overrides take
//! precedence. Mapper bugs are contained: a panic inside a mapper becomes
//! an `InternalError` for that payload and ingestion continues.

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::client::RawResult;
use crate::error::{Error, Result};
use crate::graph::{keys, EntityGraph, NodeType, Relationship};
use crate::registry::Capability;

/// A shape mapper: ingest one payload into the graph.
pub type ShapeMapper = fn(&RawResult, &mut EntityGraph) -> Result<()>;

/// Builds the per-investigation entity graph from raw results.
pub struct GraphBuilder {
    graph: EntityGraph,
    overrides: HashMap<(String, Capability), ShapeMapper>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Create a builder with the default capability mappers.
    pub fn new() -> Self {
        Self {
            graph: EntityGraph::new(),
            overrides: HashMap::new(),
        }
    }

    /// Register an endpoint-specific mapper override.
    pub fn with_mapper(
        mut self,
        endpoint_id: impl Into<String>,
        capability: Capability,
        mapper: ShapeMapper,
    ) -> Self {
        self.overrides
            .insert((endpoint_id.into(), capability), mapper);
        self
    }

    /// Ingest one raw result through the mapper for its source and
    /// capability. A panicking mapper yields `InternalError` and leaves
    /// previously ingested data intact.
    pub fn ingest(&mut self, capability: Capability, raw: &RawResult) -> Result<()> {
        let mapper = self
            .overrides
            .get(&(raw.endpoint_id.clone(), capability))
            .copied()
            .unwrap_or_else(|| default_mapper(capability));

        let graph = &mut self.graph;
        catch_unwind(AssertUnwindSafe(|| mapper(raw, graph))).unwrap_or_else(|_| {
            Err(Error::internal(format!(
                "shape mapper for {} panicked on payload from {}",
                capability, raw.endpoint_id
            )))
        })
    }

    /// Seed a provisional supplier node for a CNPJ the investigation asked
    /// about but no endpoint resolved. Provenance records the endpoint
    /// that was attempted.
    pub fn ensure_supplier(
        &mut self,
        cnpj: &str,
        attempted_endpoint: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let id = keys::supplier(cnpj);
        if self.graph.node(&id).is_some() {
            return Ok(());
        }
        let mut attributes = serde_json::Map::new();
        attributes.insert("cnpj".into(), cnpj.into());
        attributes.insert("provisional".into(), true.into());
        self.graph.upsert_node(
            id,
            NodeType::Supplier,
            attributes,
            attempted_endpoint,
            fetched_at,
        )
    }

    /// Freeze and hand over the graph.
    pub fn finish(mut self) -> EntityGraph {
        self.graph.freeze();
        self.graph
    }

    /// Read access for tests and incremental inspection.
    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }
}

/// The default mapper for a capability.
pub fn default_mapper(capability: Capability) -> ShapeMapper {
    match capability {
        Capability::SearchContracts => map_contracts,
        Capability::SearchExpenses => map_expenses,
        Capability::LookupCnpj => map_cnpj_lookup,
        Capability::LookupSanctions => map_sanctions,
        Capability::FetchPopulation => map_population,
        Capability::FetchServants => map_servants,
        Capability::GeneralInfo => map_nothing,
    }
}

// ---------------------------------------------------------------------------
// Payload helpers. Government APIs disagree on envelope and field names;
// these walk the common variants.

fn records_of(payload: &Value) -> Vec<&Value> {
    if let Some(items) = payload.as_array() {
        return items.iter().collect();
    }
    if let Some(object) = payload.as_object() {
        for key in ["data", "items", "registros", "contratos", "despesas", "resultado"] {
            if let Some(Value::Array(items)) = object.get(key) {
                return items.iter().collect();
            }
        }
        return vec![payload];
    }
    Vec::new()
}

fn str_field<'a>(record: &'a Value, field_names: &[&str]) -> Option<String> {
    for name in field_names {
        match record.get(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn num_field(record: &Value, field_names: &[&str]) -> Option<f64> {
    for name in field_names {
        match record.get(name) {
            Some(Value::Number(n)) => return n.as_f64(),
            Some(Value::String(s)) => {
                if let Ok(parsed) = s.trim().replace(',', ".").parse() {
                    return Some(parsed);
                }
            }
            _ => {}
        }
    }
    None
}

fn nested<'a>(record: &'a Value, object_name: &str) -> Option<&'a Value> {
    record.get(object_name).filter(|v| v.is_object())
}

fn digits_only(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

fn cnpj_of(record: &Value) -> Option<String> {
    let direct = str_field(record, &["cnpj_fornecedor", "cnpj", "cnpj_favorecido"]);
    let from_nested = nested(record, "fornecedor")
        .or_else(|| nested(record, "favorecido"))
        .and_then(|supplier| str_field(supplier, &["cnpj"]));
    let raw = direct.or(from_nested)?;
    let digits = digits_only(&raw);
    (digits.len() == 14).then_some(digits)
}

fn supplier_name_of(record: &Value) -> Option<String> {
    str_field(record, &["razao_social", "nome_fornecedor", "nome_favorecido"]).or_else(|| {
        nested(record, "fornecedor")
            .or_else(|| nested(record, "favorecido"))
            .and_then(|supplier| str_field(supplier, &["nome", "razao_social"]))
    })
}

fn org_code_of(record: &Value) -> Option<String> {
    str_field(record, &["codigo_orgao", "orgao_codigo"])
        .or_else(|| nested(record, "orgao").and_then(|org| str_field(org, &["codigo", "id"])))
        .or_else(|| str_field(record, &["orgao"]))
}

fn org_name_of(record: &Value) -> Option<String> {
    str_field(record, &["nome_orgao", "orgao_nome"])
        .or_else(|| nested(record, "orgao").and_then(|org| str_field(org, &["nome"])))
}

fn year_of(record: &Value) -> Option<i32> {
    if let Some(year) = num_field(record, &["ano"]) {
        return Some(year as i32);
    }
    for name in ["data_assinatura", "data_inicio", "data", "data_publicacao"] {
        if let Some(date) = str_field(record, &[name]) {
            if let Ok(parsed) = date[..date.len().min(10)].parse::<chrono::NaiveDate>() {
                return Some(parsed.year());
            }
        }
    }
    None
}

fn attrs_from(pairs: Vec<(&str, Option<Value>)>) -> serde_json::Map<String, Value> {
    pairs
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect()
}

// ---------------------------------------------------------------------------
// Default mappers, one per capability.

fn map_contracts(raw: &RawResult, graph: &mut EntityGraph) -> Result<()> {
    for record in records_of(&raw.payload) {
        let org_code = org_code_of(record).unwrap_or_else(|| "desconhecido".into());
        let year = year_of(record).unwrap_or(0);
        let number =
            str_field(record, &["numero", "numero_contrato", "id"]).unwrap_or_else(|| "s-n".into());
        let contract_id = keys::contract(&org_code, year, &number);

        let value = num_field(record, &["valor", "valor_inicial", "valor_contratado"]);
        let contract_attrs = attrs_from(vec![
            ("number", Some(number.clone().into())),
            ("year", Some(year.into())),
            ("org_code", Some(org_code.clone().into())),
            ("value", value.map(Into::into)),
            ("paid_value", num_field(record, &["valor_pago"]).map(Into::into)),
            (
                "unit_price",
                num_field(record, &["valor_unitario"]).map(Into::into),
            ),
            (
                "description",
                str_field(record, &["objeto", "descricao"]).map(Into::into),
            ),
            (
                "category",
                str_field(record, &["categoria", "funcao"]).map(Into::into),
            ),
            (
                "signed_at",
                str_field(record, &["data_assinatura", "data_inicio", "data"]).map(Into::into),
            ),
            ("uf", str_field(record, &["uf"]).map(Into::into)),
        ]);
        graph.upsert_node(
            &contract_id,
            NodeType::Contract,
            contract_attrs,
            &raw.endpoint_id,
            raw.fetched_at,
        )?;

        let org_id = keys::organization(&org_code);
        graph.upsert_node(
            &org_id,
            NodeType::Organization,
            attrs_from(vec![
                ("code", Some(org_code.clone().into())),
                ("name", org_name_of(record).map(Into::into)),
            ]),
            &raw.endpoint_id,
            raw.fetched_at,
        )?;
        graph.upsert_edge(
            &contract_id,
            &org_id,
            Relationship::ContractedBy,
            serde_json::Map::new(),
            &raw.endpoint_id,
        )?;

        if let Some(cnpj) = cnpj_of(record) {
            let supplier_id = keys::supplier(&cnpj);
            graph.upsert_node(
                &supplier_id,
                NodeType::Supplier,
                attrs_from(vec![
                    ("cnpj", Some(cnpj.clone().into())),
                    ("name", supplier_name_of(record).map(Into::into)),
                ]),
                &raw.endpoint_id,
                raw.fetched_at,
            )?;
            graph.upsert_edge(
                &supplier_id,
                &contract_id,
                Relationship::SuppliedTo,
                serde_json::Map::new(),
                &raw.endpoint_id,
            )?;

            if let Some(process) =
                str_field(record, &["licitacao", "numero_licitacao", "processo"])
            {
                let process_id = keys::bidding_process(&org_code, &process);
                graph.upsert_node(
                    &process_id,
                    NodeType::BiddingProcess,
                    attrs_from(vec![
                        ("number", Some(process.into())),
                        ("org_code", Some(org_code.clone().into())),
                    ]),
                    &raw.endpoint_id,
                    raw.fetched_at,
                )?;
                graph.upsert_edge(
                    &supplier_id,
                    &process_id,
                    Relationship::SuppliedTo,
                    serde_json::Map::new(),
                    &raw.endpoint_id,
                )?;
            }
        }

        if let Some(uf) = str_field(record, &["uf"]) {
            let municipality = str_field(record, &["municipio"]);
            let location_id = keys::location(&uf, municipality.as_deref());
            graph.upsert_node(
                &location_id,
                NodeType::Location,
                attrs_from(vec![
                    ("uf", Some(uf.into())),
                    ("municipality", municipality.map(Into::into)),
                ]),
                &raw.endpoint_id,
                raw.fetched_at,
            )?;
            graph.upsert_edge(
                &contract_id,
                &location_id,
                Relationship::LocatedIn,
                serde_json::Map::new(),
                &raw.endpoint_id,
            )?;
        }
    }
    Ok(())
}

fn map_expenses(raw: &RawResult, graph: &mut EntityGraph) -> Result<()> {
    for record in records_of(&raw.payload) {
        let org_code = org_code_of(record).unwrap_or_else(|| "desconhecido".into());
        let org_id = keys::organization(&org_code);
        graph.upsert_node(
            &org_id,
            NodeType::Organization,
            attrs_from(vec![
                ("code", Some(org_code.clone().into())),
                ("name", org_name_of(record).map(Into::into)),
            ]),
            &raw.endpoint_id,
            raw.fetched_at,
        )?;

        if let Some(cnpj) = cnpj_of(record) {
            let supplier_id = keys::supplier(&cnpj);
            graph.upsert_node(
                &supplier_id,
                NodeType::Supplier,
                attrs_from(vec![
                    ("cnpj", Some(cnpj.into())),
                    ("name", supplier_name_of(record).map(Into::into)),
                ]),
                &raw.endpoint_id,
                raw.fetched_at,
            )?;
            graph.upsert_edge(
                &supplier_id,
                &org_id,
                Relationship::SuppliedTo,
                attrs_from(vec![(
                    "value",
                    num_field(record, &["valor", "valor_pago"]).map(Into::into),
                )]),
                &raw.endpoint_id,
            )?;
        }

        // A payment referencing a contract merges the paid amount into it.
        if let Some(contract_number) = str_field(record, &["numero_contrato"]) {
            if let (Some(year), Some(paid)) =
                (year_of(record), num_field(record, &["valor_pago", "valor"]))
            {
                let contract_id = keys::contract(&org_code, year, &contract_number);
                graph.upsert_node(
                    &contract_id,
                    NodeType::Contract,
                    attrs_from(vec![
                        ("number", Some(contract_number.into())),
                        ("year", Some(year.into())),
                        ("org_code", Some(org_code.clone().into())),
                        ("paid_value", Some(paid.into())),
                    ]),
                    &raw.endpoint_id,
                    raw.fetched_at,
                )?;
            }
        }
    }
    Ok(())
}

fn map_cnpj_lookup(raw: &RawResult, graph: &mut EntityGraph) -> Result<()> {
    for record in records_of(&raw.payload) {
        let Some(cnpj) = cnpj_of(record) else {
            continue;
        };
        let supplier_id = keys::supplier(&cnpj);
        graph.upsert_node(
            &supplier_id,
            NodeType::Supplier,
            attrs_from(vec![
                ("cnpj", Some(cnpj.into())),
                (
                    "name",
                    str_field(record, &["razao_social", "nome"]).map(Into::into),
                ),
                (
                    "status",
                    str_field(record, &["situacao", "situacao_cadastral"]).map(Into::into),
                ),
                (
                    "opened_at",
                    str_field(record, &["data_abertura"]).map(Into::into),
                ),
            ]),
            &raw.endpoint_id,
            raw.fetched_at,
        )?;

        if let Some(uf) = str_field(record, &["uf"]) {
            let municipality = str_field(record, &["municipio"]);
            let location_id = keys::location(&uf, municipality.as_deref());
            graph.upsert_node(
                &location_id,
                NodeType::Location,
                attrs_from(vec![
                    ("uf", Some(uf.into())),
                    ("municipality", municipality.map(Into::into)),
                ]),
                &raw.endpoint_id,
                raw.fetched_at,
            )?;
            graph.upsert_edge(
                &supplier_id,
                &location_id,
                Relationship::LocatedIn,
                serde_json::Map::new(),
                &raw.endpoint_id,
            )?;
        }

        if let Some(Value::Array(partners)) = record.get("socios") {
            for partner in partners {
                let Some(cpf) = str_field(partner, &["cpf"]).map(|c| digits_only(&c)) else {
                    continue;
                };
                if cpf.len() != 11 {
                    continue;
                }
                let person_id = keys::person(&cpf);
                graph.upsert_node(
                    &person_id,
                    NodeType::Person,
                    attrs_from(vec![
                        ("cpf", Some(cpf.into())),
                        ("name", str_field(partner, &["nome"]).map(Into::into)),
                    ]),
                    &raw.endpoint_id,
                    raw.fetched_at,
                )?;
                graph.upsert_edge(
                    &person_id,
                    &supplier_id,
                    Relationship::PartnerOf,
                    serde_json::Map::new(),
                    &raw.endpoint_id,
                )?;
            }
        }
    }
    Ok(())
}

fn map_sanctions(raw: &RawResult, graph: &mut EntityGraph) -> Result<()> {
    for record in records_of(&raw.payload) {
        let Some(cnpj) = cnpj_of(record) else {
            continue;
        };
        let supplier_id = keys::supplier(&cnpj);
        let sanction = str_field(record, &["tipo_sancao", "sancao", "descricao"])
            .unwrap_or_else(|| "sancao".into());
        let mut attributes = serde_json::Map::new();
        attributes.insert("cnpj".into(), cnpj.into());
        attributes.insert("sanctions".into(), Value::Array(vec![sanction.into()]));
        graph.upsert_node(
            &supplier_id,
            NodeType::Supplier,
            attributes,
            &raw.endpoint_id,
            raw.fetched_at,
        )?;

        if let Some(org_code) = org_code_of(record) {
            let org_id = keys::organization(&org_code);
            graph.upsert_node(
                &org_id,
                NodeType::Organization,
                attrs_from(vec![
                    ("code", Some(org_code.into())),
                    ("name", org_name_of(record).map(Into::into)),
                ]),
                &raw.endpoint_id,
                raw.fetched_at,
            )?;
            graph.upsert_edge(
                &supplier_id,
                &org_id,
                Relationship::SuspiciousLink,
                attrs_from(vec![("reason", Some("sanction".into()))]),
                &raw.endpoint_id,
            )?;
        }
    }
    Ok(())
}

fn map_population(raw: &RawResult, graph: &mut EntityGraph) -> Result<()> {
    for record in records_of(&raw.payload) {
        let Some(uf) = str_field(record, &["uf", "sigla"]) else {
            continue;
        };
        let municipality = str_field(record, &["municipio", "nome"]);
        let location_id = keys::location(&uf, municipality.as_deref());
        graph.upsert_node(
            &location_id,
            NodeType::Location,
            attrs_from(vec![
                ("uf", Some(uf.into())),
                ("municipality", municipality.map(Into::into)),
                (
                    "population",
                    num_field(record, &["populacao", "population"]).map(Into::into),
                ),
            ]),
            &raw.endpoint_id,
            raw.fetched_at,
        )?;
    }
    Ok(())
}

fn map_servants(raw: &RawResult, graph: &mut EntityGraph) -> Result<()> {
    for record in records_of(&raw.payload) {
        let Some(cpf) = str_field(record, &["cpf"]).map(|c| digits_only(&c)) else {
            continue;
        };
        if cpf.len() != 11 {
            continue;
        }
        let person_id = keys::person(&cpf);
        graph.upsert_node(
            &person_id,
            NodeType::Person,
            attrs_from(vec![
                ("cpf", Some(cpf.into())),
                ("name", str_field(record, &["nome"]).map(Into::into)),
                ("role", str_field(record, &["cargo"]).map(Into::into)),
            ]),
            &raw.endpoint_id,
            raw.fetched_at,
        )?;

        if let Some(org_code) = org_code_of(record) {
            let org_id = keys::organization(&org_code);
            graph.upsert_node(
                &org_id,
                NodeType::Organization,
                attrs_from(vec![("code", Some(org_code.into()))]),
                &raw.endpoint_id,
                raw.fetched_at,
            )?;
            graph.upsert_edge(
                &org_id,
                &person_id,
                Relationship::ManagedBy,
                serde_json::Map::new(),
                &raw.endpoint_id,
            )?;
        }
    }
    Ok(())
}

fn map_nothing(_raw: &RawResult, _graph: &mut EntityGraph) -> Result<()> {
    Ok(())
}
