//! Listing extraction from a guide page.

use hashbrown::HashSet;
use tracing::debug;

use super::markup::{self, Section, Template};
use super::text;
use crate::models::{Category, GeoPoint};

/// Immutable tables driving section classification and listing recognition
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Keyword table in priority order; a title matches a category when it
    /// contains any of its keywords
    pub categories: Vec<(Category, Vec<String>)>,
    /// Template names that describe a listing
    pub listing_templates: Vec<String>,
    /// Section titles whose links name sub-areas
    pub area_index_labels: Vec<String>,
    /// Number of lead paragraphs kept as the page summary
    pub summary_paragraphs: usize,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            categories: vec![
                (Category::See, words(&["see", "sight", "attraction", "museum"])),
                (Category::Eat, words(&["eat", "restaurant", "food"])),
                (Category::Sleep, words(&["sleep", "hotel", "lodging"])),
                (Category::Shop, words(&["buy", "shopping"])),
                (Category::Drink, words(&["drink", "bar", "nightlife"])),
                (Category::Play, words(&["do", "entertainment", "activity"])),
            ],
            listing_templates: words(&["listing", "see", "do", "buy", "eat", "drink", "sleep"]),
            area_index_labels: words(&[
                "districts",
                "boroughs",
                "arrondissements",
                "neighbourhoods",
                "neighborhoods",
            ]),
            summary_paragraphs: 2,
        }
    }
}

impl ParserConfig {
    /// Category of a section title, first table entry wins
    pub fn classify(&self, title: &str) -> Option<Category> {
        let title = title.trim().to_lowercase();
        if title.is_empty() {
            return None;
        }
        self.categories
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| title.contains(k.as_str())))
            .map(|(category, _)| *category)
    }

    pub fn is_area_index(&self, title: &str) -> bool {
        let title = title.trim().to_lowercase();
        self.area_index_labels.iter().any(|label| *label == title)
    }

    pub fn is_listing(&self, template_name: &str) -> bool {
        let name = template_name.trim().to_lowercase();
        self.listing_templates.iter().any(|t| *t == name)
    }
}

/// A POI candidate extracted from one listing template
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub name: String,
    pub category: Category,
    pub sub_category: Option<String>,
    pub description: String,
    pub coordinates: Option<GeoPoint>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub hours: Option<String>,
    pub image: Option<String>,
    /// 1-based order of acceptance within the page
    pub rank: u32,
}

/// Everything extracted from one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    pub listings: Vec<Listing>,
    /// Linked sub-area page names, deduplicated, in order of first mention
    pub sub_areas: Vec<String>,
    pub summary: Option<String>,
}

/// Accepts listings in traversal order, dropping repeated names
struct ListingCollector {
    seen: HashSet<String>,
    listings: Vec<Listing>,
}

impl ListingCollector {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            listings: Vec::new(),
        }
    }

    fn accept(&mut self, mut listing: Listing) {
        if !self.seen.insert(listing.name.clone()) {
            debug!("Dropping repeated listing {}", listing.name);
            return;
        }
        listing.rank = self.listings.len() as u32 + 1;
        self.listings.push(listing);
    }
}

/// Parser for Wikivoyage-style guide pages
#[derive(Debug, Clone, Default)]
pub struct ListingParser {
    config: ParserConfig,
}

impl ListingParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn parse(&self, raw: &str) -> ParsedPage {
        let root = markup::parse_document(raw);

        let mut collector = ListingCollector::new();
        let mut sub_areas = Vec::new();
        let mut seen_areas = HashSet::new();

        for section in &root.children {
            let title = section.title.as_deref().unwrap_or_default();

            if self.config.is_area_index(title) {
                for link in &section.links {
                    if seen_areas.insert(link.clone()) {
                        sub_areas.push(link.clone());
                    }
                }
                continue;
            }

            if let Some(category) = self.config.classify(title) {
                self.collect_section(section, category, &mut collector);
            }
        }

        ParsedPage {
            listings: collector.listings,
            sub_areas,
            summary: self.summary(&root),
        }
    }

    /// Depth-first, section-order walk of a matched section and its subsections
    fn collect_section(&self, top: &Section, category: Category, collector: &mut ListingCollector) {
        let mut stack: Vec<(&Section, Option<String>)> = vec![(top, None)];

        while let Some((section, sub_category)) = stack.pop() {
            for template in &section.templates {
                if !self.config.is_listing(&template.name) {
                    continue;
                }
                if let Some(listing) = listing_from_template(template, category, &sub_category) {
                    collector.accept(listing);
                }
            }

            for child in section.children.iter().rev() {
                let child_title = child.title.as_deref().and_then(text::clean_field);
                stack.push((child, child_title));
            }
        }
    }

    fn summary(&self, root: &Section) -> Option<String> {
        let lead = text::strip_markup(&markup::strip_templates(&root.body));

        let mut paragraphs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for line in lead.lines().map(str::trim) {
            if line.is_empty() {
                if !current.is_empty() {
                    paragraphs.push(current.join(" "));
                    current.clear();
                }
            } else {
                current.push(line);
            }
        }
        if !current.is_empty() {
            paragraphs.push(current.join(" "));
        }

        paragraphs.truncate(self.config.summary_paragraphs);
        if paragraphs.is_empty() {
            None
        } else {
            Some(paragraphs.join("\n\n"))
        }
    }
}

fn parse_coordinate(raw: Option<&str>) -> Option<f64> {
    let value = raw?.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

fn listing_from_template(
    template: &Template,
    category: Category,
    sub_category: &Option<String>,
) -> Option<Listing> {
    let field = |name: &str| template.arg(name).and_then(text::clean_field);

    let name = field("name")?;

    let coordinates = GeoPoint::from_parts(
        parse_coordinate(template.arg("lat")),
        parse_coordinate(template.arg("long")),
    );

    let description = [field("alt"), field("content")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");

    Some(Listing {
        name,
        category,
        sub_category: sub_category.clone(),
        description,
        coordinates,
        address: field("address"),
        phone: field("phone"),
        website: field("url"),
        hours: field("hours"),
        image: field("image"),
        rank: 0,
    })
}
