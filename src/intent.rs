//! Rule-based intent classification for investigation queries.
//!
//! Each intent carries a weighted keyword set scored against the folded
//! query text. Precedence rules disambiguate the contract/supplier
//! overlap, scores normalize through a softmax, and a query matching
//! nothing falls back to `GeneralInvestigation` at 0.5 confidence.
//!
//! Classification is deterministic and idempotent: the same input always
//! yields the same output.

use serde::{Deserialize, Serialize};

use crate::extract::{documents, fold_for_matching};

/// The closed set of investigation intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Overpricing, irregular bidding, contract anomalies
    ContractAnomalyDetection,
    /// A specific supplier or company under scrutiny
    SupplierInvestigation,
    /// Budget allocation and execution analysis
    BudgetAnalysis,
    /// Fraud, kickback and diversion indicators
    CorruptionIndicators,
    /// Spending broken down by geography
    GeographicAnalysis,
    /// Spending evolution over time
    TemporalAnalysis,
    /// Relationship networks between suppliers and organizations
    NetworkAnalysis,
    /// Fallback for queries matching no specific pattern
    GeneralInvestigation,
}

impl Intent {
    /// All intents, in scoring order.
    pub const ALL: [Intent; 8] = [
        Intent::ContractAnomalyDetection,
        Intent::SupplierInvestigation,
        Intent::BudgetAnalysis,
        Intent::CorruptionIndicators,
        Intent::GeographicAnalysis,
        Intent::TemporalAnalysis,
        Intent::NetworkAnalysis,
        Intent::GeneralInvestigation,
    ];
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ContractAnomalyDetection => "contract_anomaly_detection",
            Self::SupplierInvestigation => "supplier_investigation",
            Self::BudgetAnalysis => "budget_analysis",
            Self::CorruptionIndicators => "corruption_indicators",
            Self::GeographicAnalysis => "geographic_analysis",
            Self::TemporalAnalysis => "temporal_analysis",
            Self::NetworkAnalysis => "network_analysis",
            Self::GeneralInvestigation => "general_investigation",
        };
        write!(f, "{}", s)
    }
}

/// An intent with its normalized confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentScore {
    /// The intent
    pub intent: Intent,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

/// The classification outcome: one primary intent plus alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// The primary intent
    pub intent: Intent,
    /// Confidence of the primary intent, in [0, 1]
    pub confidence: f64,
    /// Other intents that scored above zero, confidence descending
    pub alternatives: Vec<IntentScore>,
}

/// Weighted keyword sets per intent. Keywords are pre-folded; matching is
/// substring-based so singular forms also catch plurals.
fn keyword_table(intent: Intent) -> &'static [(&'static str, f64)] {
    match intent {
        Intent::ContractAnomalyDetection => &[
            ("contrato", 2.0),
            ("licitac", 2.0),
            ("pregao", 1.5),
            ("edital", 1.5),
            ("superfaturamento", 3.0),
            ("sobrepreco", 3.0),
            ("anomalia", 2.0),
            ("irregularidade", 2.0),
            ("suspeito", 1.5),
        ],
        Intent::SupplierInvestigation => &[
            ("fornecedor", 2.5),
            ("empresa contratada", 2.0),
            ("cnpj", 2.5),
            ("razao social", 2.0),
            ("socios", 1.5),
            ("investigar fornecedor", 3.0),
        ],
        Intent::BudgetAnalysis => &[
            ("orcamento", 3.0),
            ("orcamentari", 2.5),
            ("dotac", 2.0),
            ("empenho", 2.0),
            ("despesa", 1.5),
            ("gasto publico", 1.5),
            ("repasse", 1.5),
        ],
        Intent::CorruptionIndicators => &[
            ("corrupc", 3.0),
            ("fraude", 3.0),
            ("desvio", 2.5),
            ("propina", 3.0),
            ("suborno", 3.0),
            ("lavagem", 2.5),
            ("nepotismo", 2.5),
            ("improbidade", 2.5),
        ],
        Intent::GeographicAnalysis => &[
            ("por municipio", 3.0),
            ("por estado", 3.0),
            ("por regiao", 3.0),
            ("regional", 2.0),
            ("distribuicao geografica", 3.0),
            ("mapa", 2.0),
        ],
        Intent::TemporalAnalysis => &[
            ("evoluc", 2.5),
            ("tendencia", 2.5),
            ("ao longo do tempo", 3.0),
            ("historico", 2.0),
            ("serie temporal", 3.0),
            ("mes a mes", 2.5),
            ("crescimento", 1.5),
        ],
        Intent::NetworkAnalysis => &[
            ("rede", 2.5),
            ("vinculo", 2.5),
            ("conex", 2.0),
            ("relacionamento", 2.0),
            ("cartel", 3.0),
            ("conluio", 3.0),
            ("ligac", 2.0),
        ],
        Intent::GeneralInvestigation => &[],
    }
}

/// Rule-based intent classifier.
#[derive(Debug, Clone, Default)]
pub struct IntentClassifier;

impl IntentClassifier {
    /// Create a classifier.
    pub fn new() -> Self {
        Self
    }

    /// Classify a query.
    pub fn classify(&self, query: &str) -> Classification {
        let normalized = normalize(query);
        let has_cnpj = documents::contains_valid_cnpj(query);

        let mut scores: Vec<(Intent, f64)> = Intent::ALL
            .iter()
            .map(|&intent| {
                let score = keyword_table(intent)
                    .iter()
                    .filter(|(keyword, _)| normalized.contains(keyword))
                    .map(|(_, weight)| weight)
                    .sum::<f64>();
                (intent, score)
            })
            .collect();

        apply_precedence(&mut scores, &normalized, has_cnpj);

        let total: f64 = scores.iter().map(|(_, s)| s).sum();
        if total == 0.0 {
            return Classification {
                intent: Intent::GeneralInvestigation,
                confidence: 0.5,
                alternatives: Vec::new(),
            };
        }

        // Softmax over the nonzero scores.
        let nonzero: Vec<(Intent, f64)> =
            scores.iter().copied().filter(|(_, s)| *s > 0.0).collect();
        let denominator: f64 = nonzero.iter().map(|(_, s)| s.exp()).sum();
        let mut ranked: Vec<IntentScore> = nonzero
            .iter()
            .map(|(intent, score)| IntentScore {
                intent: *intent,
                confidence: score.exp() / denominator,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    position_of(a.intent).cmp(&position_of(b.intent))
                })
        });

        let primary = ranked.remove(0);
        Classification {
            intent: primary.intent,
            confidence: primary.confidence,
            alternatives: ranked,
        }
    }
}

fn position_of(intent: Intent) -> usize {
    Intent::ALL
        .iter()
        .position(|&i| i == intent)
        .unwrap_or(Intent::ALL.len())
}

/// Lowercase, fold diacritics, strip punctuation, collapse whitespace.
fn normalize(query: &str) -> String {
    let folded = fold_for_matching(query);
    let stripped: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Precedence rules resolving keyword overlaps between intents.
fn apply_precedence(scores: &mut [(Intent, f64)], normalized: &str, has_cnpj: bool) {
    let mentions_contract = normalized.contains("contrato");
    let mentions_supplier = normalized.contains("fornecedor") || normalized.contains("empresa");

    // A supplier mention only outranks contract analysis when the query
    // pins a concrete company; otherwise the contract reading prevails.
    if mentions_contract && mentions_supplier {
        let bump = if has_cnpj {
            Intent::SupplierInvestigation
        } else {
            Intent::ContractAnomalyDetection
        };
        if let Some(entry) = scores.iter_mut().find(|(i, _)| *i == bump) {
            entry.1 += 2.0;
        }
    } else if has_cnpj {
        if let Some(entry) = scores
            .iter_mut()
            .find(|(i, _)| *i == Intent::SupplierInvestigation)
        {
            entry.1 += 2.5;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(query: &str) -> Classification {
        IntentClassifier::new().classify(query)
    }

    #[test]
    fn test_contract_anomaly_query() {
        let result =
            classify("Analise contratos de saúde em Minas Gerais acima de R$ 1 milhão em 2024");
        assert_eq!(result.intent, Intent::ContractAnomalyDetection);
        assert!(result.confidence >= 0.80, "confidence {}", result.confidence);
    }

    #[test]
    fn test_supplier_query_with_cnpj() {
        let result = classify("Investigar fornecedor 12.345.678/0001-95");
        assert_eq!(result.intent, Intent::SupplierInvestigation);
    }

    #[test]
    fn test_contract_supplier_overlap_without_cnpj() {
        let result = classify("contratos com fornecedores suspeitos");
        assert_eq!(result.intent, Intent::ContractAnomalyDetection);
        assert!(result
            .alternatives
            .iter()
            .any(|a| a.intent == Intent::SupplierInvestigation));
    }

    #[test]
    fn test_contract_supplier_overlap_with_cnpj() {
        let result = classify("contratos do fornecedor 12.345.678/0001-95");
        assert_eq!(result.intent, Intent::SupplierInvestigation);
    }

    #[test]
    fn test_empty_query_falls_back() {
        let result = classify("");
        assert_eq!(result.intent, Intent::GeneralInvestigation);
        assert!((result.confidence - 0.5).abs() < f64::EPSILON);
        assert!(result.alternatives.is_empty());
    }

    #[test]
    fn test_unrelated_query_falls_back() {
        let result = classify("qual a capital da França?");
        assert_eq!(result.intent, Intent::GeneralInvestigation);
        assert!((result.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_corruption_indicators() {
        let result = classify("indícios de fraude e desvio de verbas na merenda");
        assert_eq!(result.intent, Intent::CorruptionIndicators);
    }

    #[test]
    fn test_temporal_analysis() {
        let result = classify("evolução dos gastos com educação ao longo do tempo");
        assert_eq!(result.intent, Intent::TemporalAnalysis);
    }

    #[test]
    fn test_network_analysis() {
        let result = classify("rede de vínculos entre empresas e órgãos, possível cartel");
        assert_eq!(result.intent, Intent::NetworkAnalysis);
    }

    #[test]
    fn test_alternatives_sum_with_primary_to_one() {
        let result = classify("contratos e licitações com indícios de fraude");
        let total: f64 = result.confidence
            + result
                .alternatives
                .iter()
                .map(|a| a.confidence)
                .sum::<f64>();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let query = "contratos de saúde com sobrepreço em SP";
        assert_eq!(classify(query), classify(query));
    }

    #[test]
    fn test_confidence_bounds() {
        for query in [
            "contratos",
            "fraude",
            "evolução mensal dos repasses",
            "rede de fornecedores",
        ] {
            let result = classify(query);
            assert!(result.confidence > 0.0 && result.confidence <= 1.0);
            for alt in &result.alternatives {
                assert!(alt.confidence > 0.0 && alt.confidence < 1.0);
            }
        }
    }
}
