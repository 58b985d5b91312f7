//! Built-in gazetteer: federative units, major municipalities, spending
//! categories and federal organization names.
//!
//! Matching happens on the folded copy of the query; display forms keep
//! their diacritics.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use super::{fold_for_matching, Location};

/// The 27 federative units: (code, display name).
pub const UFS: [(&str, &str); 27] = [
    ("AC", "Acre"),
    ("AL", "Alagoas"),
    ("AP", "Amapá"),
    ("AM", "Amazonas"),
    ("BA", "Bahia"),
    ("CE", "Ceará"),
    ("DF", "Distrito Federal"),
    ("ES", "Espírito Santo"),
    ("GO", "Goiás"),
    ("MA", "Maranhão"),
    ("MT", "Mato Grosso"),
    ("MS", "Mato Grosso do Sul"),
    ("MG", "Minas Gerais"),
    ("PA", "Pará"),
    ("PB", "Paraíba"),
    ("PR", "Paraná"),
    ("PE", "Pernambuco"),
    ("PI", "Piauí"),
    ("RJ", "Rio de Janeiro"),
    ("RN", "Rio Grande do Norte"),
    ("RS", "Rio Grande do Sul"),
    ("RO", "Rondônia"),
    ("RR", "Roraima"),
    ("SC", "Santa Catarina"),
    ("SP", "São Paulo"),
    ("SE", "Sergipe"),
    ("TO", "Tocantins"),
];

/// State capitals and the largest municipalities: (display name, UF code).
pub const MUNICIPALITIES: [(&str, &str); 74] = [
    // Capitals
    ("Rio Branco", "AC"),
    ("Maceió", "AL"),
    ("Macapá", "AP"),
    ("Manaus", "AM"),
    ("Salvador", "BA"),
    ("Fortaleza", "CE"),
    ("Brasília", "DF"),
    ("Vitória", "ES"),
    ("Goiânia", "GO"),
    ("São Luís", "MA"),
    ("Cuiabá", "MT"),
    ("Campo Grande", "MS"),
    ("Belo Horizonte", "MG"),
    ("Belém", "PA"),
    ("João Pessoa", "PB"),
    ("Curitiba", "PR"),
    ("Recife", "PE"),
    ("Teresina", "PI"),
    ("Natal", "RN"),
    ("Porto Alegre", "RS"),
    ("Porto Velho", "RO"),
    ("Boa Vista", "RR"),
    ("Florianópolis", "SC"),
    ("Aracaju", "SE"),
    ("Palmas", "TO"),
    // Largest non-capital municipalities
    ("Guarulhos", "SP"),
    ("Campinas", "SP"),
    ("São Gonçalo", "RJ"),
    ("Duque de Caxias", "RJ"),
    ("Nova Iguaçu", "RJ"),
    ("São Bernardo do Campo", "SP"),
    ("Santo André", "SP"),
    ("Osasco", "SP"),
    ("Jaboatão dos Guararapes", "PE"),
    ("Uberlândia", "MG"),
    ("Contagem", "MG"),
    ("Sorocaba", "SP"),
    ("Ribeirão Preto", "SP"),
    ("Feira de Santana", "BA"),
    ("Joinville", "SC"),
    ("Juiz de Fora", "MG"),
    ("Londrina", "PR"),
    ("Aparecida de Goiânia", "GO"),
    ("Niterói", "RJ"),
    ("Ananindeua", "PA"),
    ("Campos dos Goytacazes", "RJ"),
    ("Caxias do Sul", "RS"),
    ("Mauá", "SP"),
    ("Santos", "SP"),
    ("Mogi das Cruzes", "SP"),
    ("Betim", "MG"),
    ("Diadema", "SP"),
    ("Jundiaí", "SP"),
    ("Maringá", "PR"),
    ("Montes Claros", "MG"),
    ("Piracicaba", "SP"),
    ("Carapicuíba", "SP"),
    ("Olinda", "PE"),
    ("Bauru", "SP"),
    ("Anápolis", "GO"),
    ("Caruaru", "PE"),
    ("Vila Velha", "ES"),
    ("Serra", "ES"),
    ("Caucaia", "CE"),
    ("Canoas", "RS"),
    ("Franca", "SP"),
    ("Pelotas", "RS"),
    ("Ponta Grossa", "PR"),
    ("Blumenau", "SC"),
    ("Petrolina", "PE"),
    ("Uberaba", "MG"),
    ("Cascavel", "PR"),
    ("Paulista", "PE"),
    ("Santarém", "PA"),
];

/// Spending category whitelist (display form).
pub const CATEGORIES: [&str; 14] = [
    "saúde",
    "educação",
    "infraestrutura",
    "segurança",
    "transporte",
    "saneamento",
    "assistência social",
    "cultura",
    "esporte",
    "meio ambiente",
    "tecnologia",
    "habitação",
    "agricultura",
    "turismo",
];

/// Federal organization whitelist (display form).
pub const ORGANIZATIONS: [&str; 12] = [
    "Ministério da Saúde",
    "Ministério da Educação",
    "Ministério da Infraestrutura",
    "Ministério da Defesa",
    "Controladoria-Geral da União",
    "Tribunal de Contas da União",
    "Polícia Federal",
    "Fundo Nacional de Saúde",
    "Fundo Nacional de Desenvolvimento da Educação",
    "Instituto Nacional do Seguro Social",
    "Departamento Nacional de Infraestrutura de Transportes",
    "Fundação Nacional de Saúde",
];

/// Standalone two-letter uppercase tokens in the raw text (UF codes).
static UF_CODE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{2}\b").expect("invalid regex"));

/// "Ministério …", "Secretaria …", "Prefeitura de …" in the raw text.
static ORG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:Minist[ée]rio|Secretaria|Prefeitura|Tribunal de Contas)(?:\s+(?:Municipal|Estadual|Regional))?(?:\s+d[aeo]s?\s+[A-ZÀ-Ü][\wÀ-ü-]*(?:\s+(?:d[aeo]s?\s+)?[A-ZÀ-Ü][\wÀ-ü-]*)*|\s+de\s+[A-ZÀ-Ü][\wÀ-ü-]*(?:\s+[A-ZÀ-Ü][\wÀ-ü-]*)*)",
    )
    .expect("invalid regex")
});

fn word_bounded(folded_text: &str, folded_needle: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = folded_text[from..].find(folded_needle) {
        let start = from + pos;
        let end = start + folded_needle.len();
        let before_ok = start == 0
            || !folded_text[..start]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric);
        let after_ok = end == folded_text.len()
            || !folded_text[end..]
                .chars()
                .next()
                .is_some_and(char::is_alphanumeric);
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

/// Find locations: UF codes in the raw text, UF and municipality names in
/// the folded text. A municipality match implies its UF.
pub fn find_locations(raw: &str, folded: &str) -> BTreeSet<Location> {
    let mut locations = BTreeSet::new();

    for token in UF_CODE_TOKEN.find_iter(raw) {
        if let Some((code, _)) = UFS.iter().find(|(code, _)| *code == token.as_str()) {
            locations.insert(Location::uf(*code));
        }
    }

    for (code, name) in UFS {
        if word_bounded(folded, &fold_for_matching(name)) {
            locations.insert(Location::uf(code));
        }
    }

    for (name, uf) in MUNICIPALITIES {
        if word_bounded(folded, &fold_for_matching(name)) {
            locations.insert(Location::municipality(uf, name));
        }
    }

    locations
}

/// Find whitelisted spending categories.
pub fn find_categories(folded: &str) -> BTreeSet<String> {
    CATEGORIES
        .iter()
        .filter(|c| word_bounded(folded, &fold_for_matching(c)))
        .map(|c| (*c).to_string())
        .collect()
}

/// Find organizations: whitelist plus the institutional-name patterns.
pub fn find_organizations(raw: &str, folded: &str) -> BTreeSet<String> {
    let mut organizations: BTreeSet<String> = ORGANIZATIONS
        .iter()
        .filter(|o| word_bounded(folded, &fold_for_matching(o)))
        .map(|o| (*o).to_string())
        .collect();

    for m in ORG_PATTERN.find_iter(raw) {
        organizations.insert(m.as_str().trim().to_string());
    }

    organizations
}
