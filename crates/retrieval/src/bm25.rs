use std::collections::HashMap;

pub const K1: f64 = 1.5;
pub const B: f64 = 0.75;

/// Log-smoothed inverse document frequency over a tokenized corpus.
pub fn compute_idf(corpus: &[Vec<String>]) -> HashMap<String, f64> {
    let n = corpus.len() as f64;
    let mut doc_freq: HashMap<&str, u32> = HashMap::new();
    for doc in corpus {
        let unique: std::collections::HashSet<&str> = doc.iter().map(|s| s.as_str()).collect();
        for term in unique {
            *doc_freq.entry(term).or_insert(0) += 1;
        }
    }
    doc_freq
        .into_iter()
        .map(|(term, df)| {
            let idf = ((n - df as f64 + 0.5) / (df as f64 + 0.5) + 1.0).ln();
            (term.to_string(), idf)
        })
        .collect()
}

/// BM25 relevance score of a document against a query.
pub fn bm25_score(
    query_tokens: &[String],
    doc_tokens: &[String],
    idf: &HashMap<String, f64>,
    avg_doc_len: f64,
) -> f64 {
    if doc_tokens.is_empty() {
        return 0.0;
    }
    let mut term_freq: HashMap<&str, u32> = HashMap::new();
    for term in doc_tokens {
        *term_freq.entry(term.as_str()).or_insert(0) += 1;
    }
    let doc_len = doc_tokens.len() as f64;

    let mut score = 0.0;
    for term in query_tokens {
        let tf = *term_freq.get(term.as_str()).unwrap_or(&0) as f64;
        if tf == 0.0 {
            continue;
        }
        let term_idf = *idf.get(term).unwrap_or(&0.0);
        let numerator = tf * (K1 + 1.0);
        let denominator = tf + K1 * (1.0 - B + B * (doc_len / avg_doc_len.max(1.0)));
        score += term_idf * (numerator / denominator);
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idf_lower_for_common_terms() {
        let corpus = vec![
            vec!["calendar".to_string(), "event".to_string()],
            vec!["calendar".to_string(), "create".to_string()],
            vec!["gmail".to_string(), "send".to_string()],
        ];
        let idf = compute_idf(&corpus);
        assert!(idf["calendar"] < idf["gmail"]);
    }

    #[test]
    fn score_zero_for_no_overlap() {
        let idf = HashMap::from([("gmail".to_string(), 1.0)]);
        let score = bm25_score(
            &["calendar".to_string()],
            &["gmail".to_string(), "send".to_string()],
            &idf,
            2.0,
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn score_positive_for_matching_term() {
        let idf = HashMap::from([("calendar".to_string(), 1.5)]);
        let score = bm25_score(
            &["calendar".to_string()],
            &["calendar".to_string(), "event".to_string()],
            &idf,
            2.0,
        );
        assert!(score > 0.0);
    }
}
