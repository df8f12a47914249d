use crate::config::GenerationOptions;
use crate::models::ProductRecord;
use std::collections::BTreeMap;

/// Minimal one-shot prompt: just the facts and the output contract.
#[allow(dead_code)]
pub fn basic_prompt(product: &ProductRecord) -> String {
    format!(
        "Create a product listing for:\n\
         - Name: {name}\n\
         - Price: ${price:.2}\n\
         - Category: {category}\n\n\
         Respond with JSON only.",
        name = product.name,
        price = product.price,
        category = product.category,
    )
}

/// Copywriter prompt with an explicit JSON shape, a word-count window, and an
/// optional SEO keyword line. A missing `additional_info` renders as an empty
/// segment, not an error.
pub fn detailed_prompt(product: &ProductRecord, options: &GenerationOptions) -> String {
    let additional = product
        .additional_info
        .as_deref()
        .filter(|info| !info.trim().is_empty())
        .map(|info| format!("- Additional Info: {info}\n"))
        .unwrap_or_default();
    let seo_line = if options.include_seo_keywords {
        ",\n    \"keywords\": \"keyword1, keyword2, keyword3, keyword4, keyword5\""
    } else {
        ""
    };
    let words = options.description_words;

    format!(
        "You are an expert e-commerce copywriter. Analyze the product image and create a compelling product listing.\n\n\
         Product Information:\n\
         - Name: {name}\n\
         - Price: ${price:.2}\n\
         - Category: {category}\n\
         {additional}\n\
         CRITICAL: Respond with ONLY valid JSON. No markdown, no code blocks, no extra text.\n\n\
         Create this EXACT JSON structure:\n\
         {{\n    \"title\": \"Catchy product title (60 chars max)\",\n    \"description\": \"Detailed description mentioning what you see in the image ({words}-{upper} words)\",\n    \"features\": [\"Feature 1\", \"Feature 2\", \"Feature 3\", \"Feature 4\", \"Feature 5\"]{seo_line}\n}}\n\n\
         Focus on visible details: colors, materials, design elements, and distinctive features.",
        name = product.name,
        price = product.price,
        category = product.category,
        upper = words + 50,
    )
}

/// Substitutes `{name}` placeholders from the map. Placeholders with no
/// matching entry are left verbatim so partial templates degrade gracefully
/// instead of aborting a batch.
#[allow(dead_code)]
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_product(additional_info: Option<&str>) -> ProductRecord {
        ProductRecord {
            id: "42".to_string(),
            name: "Canvas Tote Bag".to_string(),
            price: 19.0,
            category: "Accessories".to_string(),
            image_source: "tote.jpg".to_string(),
            additional_info: additional_info.map(str::to_string),
        }
    }

    #[test]
    fn basic_prompt_formats_price_and_demands_json() {
        let prompt = basic_prompt(&sample_product(None));
        assert!(prompt.contains("- Name: Canvas Tote Bag"));
        assert!(prompt.contains("- Price: $19.00"));
        assert!(prompt.ends_with("Respond with JSON only."));
    }

    #[test]
    fn detailed_prompt_includes_additional_info_when_present() {
        let prompt = detailed_prompt(
            &sample_product(Some("Organic cotton")),
            &GenerationOptions::default(),
        );
        assert!(prompt.contains("- Additional Info: Organic cotton"));
    }

    #[test]
    fn detailed_prompt_renders_empty_segment_for_missing_info() {
        let prompt = detailed_prompt(&sample_product(None), &GenerationOptions::default());
        assert!(!prompt.contains("Additional Info"));
        let blank = detailed_prompt(&sample_product(Some("   ")), &GenerationOptions::default());
        assert!(!blank.contains("Additional Info"));
    }

    #[test]
    fn detailed_prompt_embeds_word_count_window() {
        let options = GenerationOptions {
            description_words: 120,
            ..GenerationOptions::default()
        };
        let prompt = detailed_prompt(&sample_product(None), &options);
        assert!(prompt.contains("(120-170 words)"));
    }

    #[test]
    fn detailed_prompt_seo_line_is_toggleable() {
        let mut options = GenerationOptions::default();
        let with_seo = detailed_prompt(&sample_product(None), &options);
        assert!(with_seo.contains("\"keywords\""));

        options.include_seo_keywords = false;
        let without_seo = detailed_prompt(&sample_product(None), &options);
        assert!(!without_seo.contains("\"keywords\""));
    }

    #[test]
    fn template_substitutes_known_placeholders() {
        let vars = BTreeMap::from([
            ("name".to_string(), "Tote".to_string()),
            ("tone".to_string(), "playful".to_string()),
        ]);
        let rendered = render_template("Describe {name} in a {tone} voice.", &vars);
        assert_eq!(rendered, "Describe Tote in a playful voice.");
    }

    #[test]
    fn template_leaves_unresolved_placeholders_verbatim() {
        let vars = BTreeMap::from([("name".to_string(), "Tote".to_string())]);
        let rendered = render_template("Describe {name} for {audience}.", &vars);
        assert_eq!(rendered, "Describe Tote for {audience}.");
    }
}
