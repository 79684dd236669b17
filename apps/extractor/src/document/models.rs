use serde::{Deserialize, Serialize};

/// Output of the document-layout service for a single CV.
/// Consumed read-only by the packer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLayout {
    pub pages: Vec<LayoutPage>,
    #[serde(default)]
    pub key_value_pairs: Vec<KeyValuePair>,
    #[serde(default)]
    pub languages: Vec<DetectedLanguage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPage {
    /// 1-based page number as reported by the layout service.
    pub page_number: u32,
    #[serde(default)]
    pub lines: Vec<LayoutLine>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutLine {
    pub content: String,
    /// Flattened x/y pairs, clockwise from top-left.
    #[serde(default)]
    pub polygon: Vec<f32>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValuePair {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedLanguage {
    pub locale: String,
    pub confidence: f32,
}

impl DocumentLayout {
    /// Locales the layout service is reasonably sure about, most confident first.
    pub fn confident_locales(&self, min_confidence: f32) -> Vec<String> {
        let mut langs: Vec<&DetectedLanguage> = self
            .languages
            .iter()
            .filter(|l| l.confidence >= min_confidence)
            .collect();
        langs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        langs.into_iter().map(|l| l.locale.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_deserializes_with_defaults() {
        let json = r#"{
            "pages": [
                {"pageNumber": 1, "lines": [{"content": "Max Müller"}]}
            ]
        }"#;
        let layout: DocumentLayout = serde_json::from_str(json).unwrap();
        assert_eq!(layout.pages.len(), 1);
        assert!(layout.key_value_pairs.is_empty());
        assert!(layout.pages[0].lines[0].confidence.is_none());
    }

    #[test]
    fn test_confident_locales_sorted_and_filtered() {
        let layout = DocumentLayout {
            languages: vec![
                DetectedLanguage {
                    locale: "en".to_string(),
                    confidence: 0.4,
                },
                DetectedLanguage {
                    locale: "de".to_string(),
                    confidence: 0.9,
                },
                DetectedLanguage {
                    locale: "fr".to_string(),
                    confidence: 0.1,
                },
            ],
            ..Default::default()
        };
        assert_eq!(layout.confident_locales(0.3), vec!["de", "en"]);
    }
}
