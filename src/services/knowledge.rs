// src/services/knowledge.rs
//
// Normalization of raw intake form data into structured project knowledge,
// and assembly of the per-category documents that get chunked and embedded.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// The five document categories the vector index is partitioned by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeDocType {
    Product,
    BrandVoice,
    Audience,
    Compliance,
    Competitors,
}

impl KnowledgeDocType {
    pub const ALL: [KnowledgeDocType; 5] = [
        KnowledgeDocType::Product,
        KnowledgeDocType::BrandVoice,
        KnowledgeDocType::Audience,
        KnowledgeDocType::Compliance,
        KnowledgeDocType::Competitors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeDocType::Product => "product",
            KnowledgeDocType::BrandVoice => "brand_voice",
            KnowledgeDocType::Audience => "audience",
            KnowledgeDocType::Compliance => "compliance",
            KnowledgeDocType::Competitors => "competitors",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSection {
    pub id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub project_id: String,
    pub doc_type: KnowledgeDocType,
    pub version: u32,
    pub generated_at: i64,
    pub sections: Vec<KnowledgeSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeProduct {
    pub summary: Option<String>,
    pub details: Option<String>,
    pub offer: Option<String>,
    pub pricing: Option<String>,
    pub primary_call_to_action: Option<String>,
    pub primary_goal: Option<String>,
    pub geographic_focus: Option<String>,
    pub website_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeVisual {
    pub brand_colors: Vec<String>,
    pub fonts: Vec<String>,
    pub image_style: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBrandVoice {
    pub personality: BTreeMap<String, f64>,
    pub core_values: Vec<String>,
    pub words_to_use: Vec<String>,
    pub words_to_avoid: Vec<String>,
    pub visual: KnowledgeVisual,
    pub topics_focus: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeAudience {
    pub ideal_customer_description: Option<String>,
    pub pain_points: Vec<String>,
    pub demographics: Option<String>,
    pub exclusions: Option<String>,
    pub geographic_focus: Option<String>,
    pub active_channels: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeCompetitors {
    pub competitor_list: Vec<String>,
    pub differentiators: Option<String>,
    pub we_win_because: Option<String>,
}

/// Normalized knowledge for one project, derived from the intake form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectKnowledge {
    pub company_name: Option<String>,
    pub product: KnowledgeProduct,
    pub brand_voice: KnowledgeBrandVoice,
    pub target_audience: KnowledgeAudience,
    pub competitors: KnowledgeCompetitors,
    pub approved_claims: Vec<String>,
    pub disallowed_claims: Vec<String>,
    pub compliance_rules: Vec<String>,
    pub platforms_enabled: Vec<String>,
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Accepts either a JSON array of strings or a delimited string. Delimiters
/// are newline, comma, semicolon, and pipe; leading enumeration markers like
/// "1." or "2)" are stripped.
pub fn normalize_list(value: Option<&Value>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(text) => text
            .split(['\n', ',', ';', '|'])
            .map(strip_enumeration)
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn strip_enumeration(item: &str) -> String {
    let trimmed = item.trim();
    let stripped = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .filter(|&idx| idx > 0 && matches!(trimmed.as_bytes().get(idx), Some(b'.') | Some(b')')))
        .map(|idx| trimmed[idx + 1..].trim())
        .unwrap_or(trimmed);
    stripped.to_string()
}

fn number_map(value: Option<&Value>) -> BTreeMap<String, f64> {
    let mut map = BTreeMap::new();
    if let Some(Value::Object(obj)) = value {
        for (key, val) in obj {
            if let Some(num) = val.as_f64() {
                map.insert(key.clone(), num);
            }
        }
    }
    map
}

/// Transforms raw intake form JSON into normalized project knowledge.
pub fn normalize_intake_to_knowledge(intake: &Value) -> ProjectKnowledge {
    let empty = json!({});
    let section = |key: &str| intake.get(key).unwrap_or(&empty).clone();

    let project_basics = section("project_basics");
    let business_summary = section("business_summary");
    let offer_funnel = section("offer_funnel");
    let brand_voice = section("brand_voice");
    let visual_brand = section("visual_brand");
    let target_audience = section("target_audience");
    let competitors = section("competitors");
    let channels = section("channels");
    let examples = section("examples");
    let compliance = section("compliance");
    let claims = section("claims");

    let product = KnowledgeProduct {
        summary: string_field(&business_summary, "short_description"),
        details: string_field(&business_summary, "product_or_service_description"),
        offer: string_field(&offer_funnel, "primary_offer"),
        pricing: string_field(&offer_funnel, "pricing_range"),
        primary_call_to_action: string_field(&offer_funnel, "primary_call_to_action"),
        primary_goal: string_field(&business_summary, "primary_goal"),
        geographic_focus: string_field(&business_summary, "geographic_focus"),
        website_url: string_field(&project_basics, "website_url"),
    };

    let brand = KnowledgeBrandVoice {
        personality: number_map(Some(&brand_voice)),
        core_values: normalize_list(brand_voice.get("brand_values")),
        words_to_use: normalize_list(brand_voice.get("words_we_like")),
        words_to_avoid: normalize_list(brand_voice.get("words_we_avoid")),
        visual: KnowledgeVisual {
            brand_colors: normalize_list(visual_brand.get("brand_colors")),
            fonts: normalize_list(visual_brand.get("fonts")),
            image_style: string_field(&visual_brand, "image_style"),
            logo_url: string_field(&visual_brand, "logo_url"),
        },
        topics_focus: normalize_list(channels.get("topics_focus")),
    };

    let audience = KnowledgeAudience {
        ideal_customer_description: string_field(&target_audience, "ideal_customer_description"),
        pain_points: normalize_list(target_audience.get("top_pain_points")),
        demographics: string_field(&target_audience, "demographics"),
        exclusions: string_field(&target_audience, "exclusions"),
        geographic_focus: string_field(&business_summary, "geographic_focus"),
        active_channels: normalize_list(channels.get("active_channels")),
    };

    let competitors_block = KnowledgeCompetitors {
        competitor_list: normalize_list(competitors.get("competitor_list")),
        differentiators: string_field(&competitors, "differentiators"),
        we_win_because: string_field(&competitors, "we_win_because"),
    };

    let mut compliance_rules = normalize_list(compliance.get("rules"));
    compliance_rules.extend(normalize_list(examples.get("banned_content")));

    let approved_claims = {
        let list = normalize_list(compliance.get("approved_claims"));
        if list.is_empty() {
            normalize_list(claims.get("approved_claims"))
        } else {
            list
        }
    };
    let disallowed_claims = {
        let list = normalize_list(compliance.get("disallowed_claims"));
        if list.is_empty() {
            normalize_list(claims.get("disallowed_claims"))
        } else {
            list
        }
    };

    let platforms_enabled = normalize_list(channels.get("active_channels"));

    ProjectKnowledge {
        company_name: string_field(&project_basics, "project_name"),
        product,
        brand_voice: brand,
        target_audience: audience,
        competitors: competitors_block,
        approved_claims,
        disallowed_claims,
        compliance_rules,
        platforms_enabled,
    }
}

pub fn build_product_description(product: &KnowledgeProduct) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(v) = &product.summary {
        parts.push(format!("Summary: {v}"));
    }
    if let Some(v) = &product.details {
        parts.push(format!("Details: {v}"));
    }
    if let Some(v) = &product.offer {
        parts.push(format!("Primary Offer: {v}"));
    }
    if let Some(v) = &product.pricing {
        parts.push(format!("Pricing: {v}"));
    }
    if let Some(v) = &product.primary_call_to_action {
        parts.push(format!("Primary CTA: {v}"));
    }
    if let Some(v) = &product.primary_goal {
        parts.push(format!("Primary Goal: {v}"));
    }
    if let Some(v) = &product.geographic_focus {
        parts.push(format!("Geographic Focus: {v}"));
    }
    if let Some(v) = &product.website_url {
        parts.push(format!("Website: {v}"));
    }
    parts.join("\n")
}

fn push_section(sections: &mut Vec<KnowledgeSection>, id: &str, title: &str, content: String) {
    if !content.trim().is_empty() {
        sections.push(KnowledgeSection {
            id: id.to_string(),
            title: title.to_string(),
            content,
        });
    }
}

/// Builds the five per-category documents from normalized knowledge.
/// Categories with no content produce a document with zero sections.
pub fn build_knowledge_documents(
    project_id: &str,
    version: u32,
    knowledge: &ProjectKnowledge,
) -> Vec<KnowledgeDocument> {
    let generated_at = Utc::now().timestamp_millis();

    let mut product_sections = Vec::new();
    if let Some(name) = &knowledge.company_name {
        push_section(&mut product_sections, "company-name", "Company", name.clone());
    }
    push_section(
        &mut product_sections,
        "product-description",
        "Product Description",
        build_product_description(&knowledge.product),
    );

    let brand = &knowledge.brand_voice;
    let mut brand_sections = Vec::new();
    push_section(
        &mut brand_sections,
        "brand-values",
        "Core Values",
        brand.core_values.join(", "),
    );
    push_section(
        &mut brand_sections,
        "brand-personality",
        "Voice Personality",
        brand
            .personality
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n"),
    );
    push_section(
        &mut brand_sections,
        "brand-words-use",
        "Words We Like",
        brand.words_to_use.join(", "),
    );
    push_section(
        &mut brand_sections,
        "brand-words-avoid",
        "Words to Avoid",
        brand.words_to_avoid.join(", "),
    );
    push_section(
        &mut brand_sections,
        "brand-topics",
        "Topics to Focus On",
        brand.topics_focus.join(", "),
    );
    let mut visuals: Vec<String> = Vec::new();
    if let Some(logo) = &brand.visual.logo_url {
        visuals.push(format!("Logo: {logo}"));
    }
    if !brand.visual.brand_colors.is_empty() {
        visuals.push(format!("Colors: {}", brand.visual.brand_colors.join(", ")));
    }
    if !brand.visual.fonts.is_empty() {
        visuals.push(format!("Fonts: {}", brand.visual.fonts.join(", ")));
    }
    if let Some(style) = &brand.visual.image_style {
        visuals.push(format!("Image Style: {style}"));
    }
    push_section(
        &mut brand_sections,
        "brand-visuals",
        "Visual Brand",
        visuals.join("\n"),
    );

    let audience = &knowledge.target_audience;
    let mut audience_sections = Vec::new();
    if let Some(ideal) = &audience.ideal_customer_description {
        push_section(
            &mut audience_sections,
            "audience-ideal",
            "Ideal Customer",
            ideal.clone(),
        );
    }
    push_section(
        &mut audience_sections,
        "audience-pain-points",
        "Pain Points",
        audience.pain_points.join("\n"),
    );
    if let Some(demo) = &audience.demographics {
        push_section(
            &mut audience_sections,
            "audience-demographics",
            "Demographics",
            demo.clone(),
        );
    }
    if let Some(excl) = &audience.exclusions {
        push_section(
            &mut audience_sections,
            "audience-exclusions",
            "Exclusions",
            excl.clone(),
        );
    }
    if let Some(geo) = &audience.geographic_focus {
        push_section(&mut audience_sections, "audience-geo", "Geographic Focus", geo.clone());
    }
    push_section(
        &mut audience_sections,
        "audience-platforms",
        "Platforms Enabled",
        knowledge.platforms_enabled.join(", "),
    );

    let mut compliance_sections = Vec::new();
    push_section(
        &mut compliance_sections,
        "compliance-approved",
        "Approved Claims",
        knowledge.approved_claims.join("\n"),
    );
    push_section(
        &mut compliance_sections,
        "compliance-disallowed",
        "Disallowed Claims",
        knowledge.disallowed_claims.join("\n"),
    );
    push_section(
        &mut compliance_sections,
        "compliance-rules",
        "Compliance Rules",
        knowledge.compliance_rules.join("\n"),
    );

    let comp = &knowledge.competitors;
    let mut competitor_sections = Vec::new();
    push_section(
        &mut competitor_sections,
        "competitors-list",
        "Competitors",
        comp.competitor_list.join("\n"),
    );
    if let Some(diff) = &comp.differentiators {
        push_section(
            &mut competitor_sections,
            "competitors-differentiators",
            "Differentiators",
            diff.clone(),
        );
    }
    if let Some(win) = &comp.we_win_because {
        push_section(&mut competitor_sections, "competitors-win", "We Win Because", win.clone());
    }

    let make = |doc_type: KnowledgeDocType, sections: Vec<KnowledgeSection>| KnowledgeDocument {
        project_id: project_id.to_string(),
        doc_type,
        version,
        generated_at,
        sections,
    };

    vec![
        make(KnowledgeDocType::Product, product_sections),
        make(KnowledgeDocType::BrandVoice, brand_sections),
        make(KnowledgeDocType::Audience, audience_sections),
        make(KnowledgeDocType::Compliance, compliance_sections),
        make(KnowledgeDocType::Competitors, competitor_sections),
    ]
}

/// Flattened structured snapshot served for the `summary` context category.
pub fn build_knowledge_summary(knowledge: &ProjectKnowledge) -> Value {
    json!({
        "company_name": knowledge.company_name,
        "product_description": build_product_description(&knowledge.product),
        "brand_voice": knowledge.brand_voice,
        "audience": knowledge.target_audience,
        "competitors": knowledge.competitors,
        "approved_claims": knowledge.approved_claims,
        "disallowed_claims": knowledge.disallowed_claims,
        "compliance_rules": knowledge.compliance_rules,
        "platforms_enabled": knowledge.platforms_enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_list_splits_delimited_strings() {
        let value = json!("1. Trust\n2) Quality, Speed; Care | Warmth");
        let list = normalize_list(Some(&value));
        assert_eq!(list, vec!["Trust", "Quality", "Speed", "Care", "Warmth"]);
    }

    #[test]
    fn normalize_list_accepts_arrays_and_drops_blanks() {
        let value = json!(["  alpha ", "", "beta"]);
        assert_eq!(normalize_list(Some(&value)), vec!["alpha", "beta"]);
        assert!(normalize_list(None).is_empty());
        assert!(normalize_list(Some(&json!(42))).is_empty());
    }

    #[test]
    fn intake_normalization_extracts_core_fields() {
        let intake = json!({
            "project_basics": {
                "project_name": "Acme Apiaries",
                "website_url": "https://acme.example.com"
            },
            "business_summary": {
                "short_description": "Local honey producer",
                "primary_goal": "Grow direct sales",
                "geographic_focus": "Pacific Northwest"
            },
            "brand_voice": {
                "warmth": 0.8,
                "brand_values": "Honesty, Craft",
                "words_we_avoid": "cheap; synthetic"
            },
            "target_audience": {
                "ideal_customer_description": "Home cooks who value local food",
                "top_pain_points": ["Grocery honey is bland", "Hard to verify sourcing"]
            },
            "competitors": { "competitor_list": "BigBee Co\nHoneyMart" },
            "channels": { "active_channels": ["x", "instagram"] },
            "compliance": { "rules": "No medical claims" }
        });

        let knowledge = normalize_intake_to_knowledge(&intake);
        assert_eq!(knowledge.company_name.as_deref(), Some("Acme Apiaries"));
        assert_eq!(
            knowledge.product.website_url.as_deref(),
            Some("https://acme.example.com")
        );
        assert_eq!(knowledge.brand_voice.core_values, vec!["Honesty", "Craft"]);
        assert_eq!(knowledge.brand_voice.personality.get("warmth"), Some(&0.8));
        assert_eq!(knowledge.target_audience.pain_points.len(), 2);
        assert_eq!(
            knowledge.competitors.competitor_list,
            vec!["BigBee Co", "HoneyMart"]
        );
        assert_eq!(knowledge.platforms_enabled, vec!["x", "instagram"]);
        assert_eq!(knowledge.compliance_rules, vec!["No medical claims"]);
    }

    #[test]
    fn documents_cover_all_five_categories() {
        let intake = json!({
            "project_basics": { "project_name": "Acme" },
            "compliance": { "rules": "No medical claims" }
        });
        let knowledge = normalize_intake_to_knowledge(&intake);
        let docs = build_knowledge_documents("7", 1, &knowledge);
        assert_eq!(docs.len(), 5);
        let types: Vec<_> = docs.iter().map(|d| d.doc_type).collect();
        assert_eq!(types, KnowledgeDocType::ALL.to_vec());

        let compliance = docs
            .iter()
            .find(|d| d.doc_type == KnowledgeDocType::Compliance)
            .unwrap();
        assert_eq!(compliance.sections.len(), 1);
        assert_eq!(compliance.sections[0].id, "compliance-rules");
    }

    #[test]
    fn summary_flattens_structured_knowledge() {
        let mut knowledge = ProjectKnowledge::default();
        knowledge.company_name = Some("Acme".into());
        knowledge.product.summary = Some("Local honey".into());
        let summary = build_knowledge_summary(&knowledge);
        assert_eq!(summary["company_name"], "Acme");
        assert!(summary["product_description"]
            .as_str()
            .unwrap()
            .contains("Summary: Local honey"));
    }
}
