//! Typed views of the landing-page content document.
//!
//! The content store persists an untyped [`Document`]; these structs describe
//! what each section is expected to hold and build the compiled-in default.
//! Field names serialize in camelCase so exported files keep the same shape
//! the page renderer consumes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

/// Section names of the content document.
pub mod sections {
    pub const TOP_BANNER: &str = "topBanner";
    pub const VIDEO: &str = "video";
    pub const CONTENT_BLOCKER: &str = "contentBlocker";
    pub const MAIN_OFFER: &str = "mainOffer";
    pub const ALTERNATIVE_OFFERS: &str = "alternativeOffers";
    pub const DOCTORS: &str = "doctors";
    pub const TESTIMONIALS: &str = "testimonials";
    pub const NEWS: &str = "news";
    pub const GUARANTEE: &str = "guarantee";
    pub const FAQ: &str = "faq";
    pub const FOOTER: &str = "footer";
    pub const TITLE_BLOCKS: &str = "titleBlocks";
    pub const GLOBAL_TITLE_STYLING: &str = "globalTitleStyling";
    pub const GLOBAL_BACKGROUND: &str = "globalBackground";
    pub const CUSTOM_CTAS: &str = "customCTAs";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopBanner {
    pub title: String,
    pub subtitle: String,
    pub button_text: String,
    pub title_color: String,
    pub subtitle_color: String,
    pub button_color: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "16:9")]
    Landscape,
    #[default]
    #[serde(rename = "9:16")]
    Portrait,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Video {
    pub embed_code: String,
    pub aspect_ratio: AspectRatio,
    pub sound_warning: String,
    pub urgency_warning: String,
}

/// When the blocked part of the page unlocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    Immediate,
    SpecificTime,
    AfterVideo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationType {
    #[default]
    Minutes,
    Hours,
    Days,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentBlocker {
    pub enabled: bool,
    pub schedule_mode: ScheduleMode,
    pub unlock_time_minutes: u32,
    pub unlock_time_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_end_time: Option<String>,
    pub duration_type: DurationType,
    pub duration_value: u32,
    pub timezone: String,
    pub blocked_title: String,
    pub blocked_subtitle: String,
    pub blocked_message: String,
    pub timer_display: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferBadges {
    pub guarantee: String,
    pub shipping: String,
    pub security: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MainOffer {
    pub product_name: String,
    pub package_name: String,
    pub product_image: String,
    pub savings: String,
    pub button_text: String,
    pub button_url: String,
    pub price_per_bottle: String,
    pub total_price: String,
    pub badges: OfferBadges,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlternativeOffer {
    pub product_image: String,
    pub product_name: String,
    pub package_name: String,
    pub savings: String,
    pub price_per_bottle: String,
    pub total_price: String,
    pub shipping: String,
    pub guarantee: String,
    pub security: String,
    pub button_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlternativeOffers {
    pub offer1: AlternativeOffer,
    pub offer2: AlternativeOffer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Doctor {
    pub id: u64,
    pub name: String,
    pub title: String,
    pub institution: String,
    pub photo: String,
    pub recommendation: String,
    pub video_embed: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DoctorsSection {
    pub title: String,
    pub subtitle: String,
    pub drag_instruction: String,
    pub doctors: Vec<Doctor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Testimonial {
    pub id: u64,
    pub name: String,
    pub location: String,
    pub photo: String,
    pub testimonial: String,
    pub rating: u8,
    pub video_embed: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestimonialsSection {
    pub title: String,
    pub subtitle: String,
    pub customers: Vec<Testimonial>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewsArticle {
    pub id: u64,
    pub outlet: String,
    pub logo: String,
    pub redirect_url: String,
    pub title: String,
    pub description: String,
    pub video_embed: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewsSection {
    pub title: String,
    pub subtitle: String,
    pub drag_instruction: String,
    pub articles: Vec<NewsArticle>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Guarantee {
    pub days: String,
    pub title: String,
    pub subtitle: String,
    pub description: Vec<String>,
    pub brand_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FaqItem {
    pub id: u64,
    pub question: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_badge: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FaqSection {
    pub title: String,
    pub items: Vec<FaqItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Footer {
    pub brand_name: String,
    pub copyright: String,
    pub disclaimer: String,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TitleBlock {
    pub title: String,
    pub subtitle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drag_instruction: Option<String>,
    pub title_color: String,
    pub subtitle_color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformLifeBlock {
    pub title: String,
    pub subtitle1: String,
    pub subtitle2: String,
    pub title_color: String,
    pub subtitle1_color: String,
    pub subtitle2_color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TitleBlocks {
    pub clinically_reviewed: TitleBlock,
    pub no_filters: TitleBlock,
    pub news_outlets: TitleBlock,
    pub transform_life: TransformLifeBlock,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorKind {
    #[default]
    Solid,
    Gradient,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorPreset {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: ColorKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalTitleStyling {
    pub available_colors: Vec<ColorPreset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackgroundPreset {
    pub name: String,
    pub class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalBackground {
    pub background_class: String,
    pub available_backgrounds: Vec<BackgroundPreset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CtaColor {
    pub name: String,
    pub background: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CtaGlobalSettings {
    pub default_background_color: String,
    pub default_text_color: String,
    pub available_colors: Vec<CtaColor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallToAction {
    pub enabled: bool,
    pub text: String,
    pub icon: String,
    pub background_color: String,
    pub text_color: String,
    pub use_pulse_animation: bool,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomCtas {
    pub global_settings: CtaGlobalSettings,
    #[serde(rename = "doctorTrustCTA")]
    pub doctor_trust_cta: CallToAction,
    #[serde(rename = "successStoryCTA")]
    pub success_story_cta: CallToAction,
}

/// Every section of the page, fully typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteContent {
    pub top_banner: TopBanner,
    pub video: Video,
    pub content_blocker: ContentBlocker,
    pub main_offer: MainOffer,
    pub alternative_offers: AlternativeOffers,
    pub doctors: DoctorsSection,
    pub testimonials: TestimonialsSection,
    pub news: NewsSection,
    pub guarantee: Guarantee,
    pub faq: FaqSection,
    pub footer: Footer,
    pub title_blocks: TitleBlocks,
    pub global_title_styling: GlobalTitleStyling,
    pub global_background: GlobalBackground,
    #[serde(rename = "customCTAs")]
    pub custom_ctas: CustomCtas,
}

impl SiteContent {
    /// Decode the whole document into typed sections.
    ///
    /// Sections that are missing or malformed decode to their empty form;
    /// unknown sections are ignored.
    #[must_use]
    pub fn from_document(document: &Document) -> Self {
        serde_json::from_value(Value::Object(document.as_map().clone())).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "content document does not match the typed sections");
            Self::default()
        })
    }
}

/// The item lists a content document holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemList {
    Doctors,
    Testimonials,
    News,
    Faq,
}

impl ItemList {
    /// All lists, in page order.
    pub const ALL: [Self; 4] = [Self::Doctors, Self::Testimonials, Self::News, Self::Faq];

    /// Section holding the list.
    #[must_use]
    pub fn section(self) -> &'static str {
        match self {
            Self::Doctors => sections::DOCTORS,
            Self::Testimonials => sections::TESTIMONIALS,
            Self::News => sections::NEWS,
            Self::Faq => sections::FAQ,
        }
    }

    /// Field of the section that holds the array.
    #[must_use]
    pub fn field(self) -> &'static str {
        match self {
            Self::Doctors => "doctors",
            Self::Testimonials => "customers",
            Self::News => "articles",
            Self::Faq => "items",
        }
    }
}

impl fmt::Display for ItemList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Doctors => "doctors",
            Self::Testimonials => "testimonials",
            Self::News => "news",
            Self::Faq => "faq",
        };
        f.write_str(name)
    }
}

impl FromStr for ItemList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "doctors" => Ok(Self::Doctors),
            "testimonials" | "customers" => Ok(Self::Testimonials),
            "news" | "articles" => Ok(Self::News),
            "faq" => Ok(Self::Faq),
            other => Err(format!(
                "unknown list '{other}' (expected doctors, testimonials, news or faq)"
            )),
        }
    }
}

/// Numeric id of a list item, if it has one.
#[must_use]
pub fn item_id(item: &Value) -> Option<u64> {
    item.get("id").and_then(Value::as_u64)
}

/// The id the next inserted item receives: one past the largest existing id.
/// `None` once the largest id is `u64::MAX`.
#[must_use]
pub fn next_item_id(items: &[Value]) -> Option<u64> {
    items.iter().filter_map(item_id).max().unwrap_or(0).checked_add(1)
}

/// The compiled-in default content.
#[must_use]
pub fn default_content() -> Document {
    match serde_json::to_value(default_site()) {
        Ok(Value::Object(map)) => Document::from(map),
        _ => Document::new(),
    }
}

fn s(text: &str) -> String {
    text.to_owned()
}

fn title_block(title: &str, subtitle: &str, title_color: &str, subtitle_color: &str) -> TitleBlock {
    TitleBlock {
        title: s(title),
        subtitle: s(subtitle),
        drag_instruction: None,
        title_color: s(title_color),
        subtitle_color: s(subtitle_color),
    }
}

fn alternative(package: &str, savings: &str, per: &str, total: &str, shipping: &str) -> AlternativeOffer {
    AlternativeOffer {
        product_image: String::new(),
        product_name: s(BRAND),
        package_name: s(package),
        savings: s(savings),
        price_per_bottle: s(per),
        total_price: s(total),
        shipping: s(shipping),
        guarantee: s("90d"),
        security: s("Safe"),
        button_url: String::new(),
    }
}

fn cta(text: &str, icon: &str, background: &str) -> CallToAction {
    CallToAction {
        enabled: true,
        text: s(text),
        icon: s(icon),
        background_color: s(background),
        text_color: s("text-white"),
        use_pulse_animation: true,
        url: String::new(),
    }
}

const BRAND: &str = "NORTHWIND";

#[allow(clippy::too_many_lines)]
fn default_site() -> SiteContent {
    SiteContent {
        top_banner: TopBanner {
            title: s("Meet NORTHWIND Daily"),
            subtitle: s("A simple morning routine, explained in three minutes"),
            button_text: s("WATCH THE VIDEO BELOW"),
            title_color: s("text-blue-300"),
            subtitle_color: s("text-blue-200"),
            button_color: s("text-blue-300"),
        },
        video: Video {
            embed_code: String::new(),
            aspect_ratio: AspectRatio::Portrait,
            sound_warning: s("Please make sure your sound is on"),
            urgency_warning: s("This presentation is available for a limited time"),
        },
        content_blocker: ContentBlocker {
            enabled: false,
            schedule_mode: ScheduleMode::Immediate,
            unlock_time_minutes: 1,
            unlock_time_seconds: 0,
            scheduled_start_time: None,
            scheduled_end_time: None,
            duration_type: DurationType::Minutes,
            duration_value: 1,
            timezone: s("America/New_York"),
            blocked_title: String::new(),
            blocked_subtitle: String::new(),
            blocked_message: String::new(),
            timer_display: false,
        },
        main_offer: MainOffer {
            product_name: s(BRAND),
            package_name: s("6 BOTTLE PACKAGE"),
            product_image: String::new(),
            savings: s("BEST VALUE"),
            button_text: s("CLAIM OFFER NOW"),
            button_url: String::new(),
            price_per_bottle: s("$49"),
            total_price: s("$294"),
            badges: OfferBadges {
                guarantee: s("90-Day"),
                shipping: s("Free Ship"),
                security: s("Secure"),
            },
        },
        alternative_offers: AlternativeOffers {
            offer1: alternative("3 BOTTLE PACKAGE", "SAVE $90", "$66", "$198", "Free"),
            offer2: alternative("2 BOTTLE PACKAGE", "SAVE $40", "$69", "$138", "$9.99"),
        },
        doctors: DoctorsSection {
            title: s("Reviewed by Professionals"),
            subtitle: s("What practitioners say about NORTHWIND"),
            drag_instruction: s("Drag to navigate between reviews"),
            doctors: vec![
                Doctor {
                    id: 1,
                    name: s("Dr. A. Example"),
                    title: s("General Practitioner"),
                    institution: s("Example Clinic"),
                    recommendation: s("A sensible routine with transparent ingredients."),
                    ..Doctor::default()
                },
                Doctor {
                    id: 2,
                    name: s("Dr. B. Sample"),
                    title: s("Nutritionist"),
                    institution: s("Sample Health Institute"),
                    recommendation: s("Clear labeling and a reasonable daily dose."),
                    ..Doctor::default()
                },
            ],
        },
        testimonials: TestimonialsSection {
            title: s("Real Customers"),
            subtitle: s("What customers are saying about NORTHWIND"),
            customers: vec![
                Testimonial {
                    id: 1,
                    name: s("John O."),
                    location: s("Florida"),
                    testimonial: s("Easy to fit into my mornings."),
                    rating: 5,
                    ..Testimonial::default()
                },
                Testimonial {
                    id: 2,
                    name: s("Robert S."),
                    location: s("California"),
                    testimonial: s("Shipping was quick and support was friendly."),
                    rating: 5,
                    ..Testimonial::default()
                },
            ],
        },
        news: NewsSection {
            title: s("In the News"),
            subtitle: s("Coverage of NORTHWIND"),
            drag_instruction: s("Drag to navigate between articles"),
            articles: vec![NewsArticle {
                id: 1,
                outlet: s("Example Daily"),
                title: s("Morning Routines Are Having a Moment"),
                description: s("A look at why simple daily habits are trending."),
                ..NewsArticle::default()
            }],
        },
        guarantee: Guarantee {
            days: s("90"),
            title: s("90 Days Guarantee"),
            subtitle: s("100% money-back guarantee"),
            description: vec![
                s("Try NORTHWIND as soon as it arrives."),
                s("If you are not satisfied, contact us within 90 days for a full refund."),
            ],
            brand_name: s(BRAND),
        },
        faq: FaqSection {
            title: s("Frequently Asked Questions"),
            items: vec![
                FaqItem {
                    id: 1,
                    question: s("How do I take NORTHWIND?"),
                    answer: s("Follow the directions on the label."),
                    has_badge: Some(true),
                    badge_text: Some(s("✓ 90-Day Guarantee")),
                },
                FaqItem {
                    id: 2,
                    question: s("Can I combine it with other supplements?"),
                    answer: s("Ask a healthcare professional before combining supplements."),
                    has_badge: None,
                    badge_text: None,
                },
            ],
        },
        footer: Footer {
            brand_name: s(BRAND),
            copyright: s("Copyright ©2025 | NORTHWIND"),
            disclaimer: s(
                "These statements have not been evaluated by the Food and Drug Administration.",
            ),
            links: vec![s("Privacy Policy"), s("Terms of Service"), s("Contact Us")],
        },
        title_blocks: TitleBlocks {
            clinically_reviewed: title_block(
                "Reviewed.",
                "Professionally Evaluated",
                "text-blue-300",
                "text-yellow-300",
            ),
            no_filters: title_block(
                "Real Customers.",
                "What customers are saying",
                "text-blue-400",
                "text-slate-300",
            ),
            news_outlets: TitleBlock {
                drag_instruction: Some(s("Drag to navigate between articles")),
                ..title_block("In the News", "Coverage of NORTHWIND", "text-green-400", "text-slate-300")
            },
            transform_life: TransformLifeBlock {
                title: s("Ready to Start?"),
                subtitle1: s("Choose your NORTHWIND package below"),
                subtitle2: s("Every order is covered by the 90-day guarantee"),
                title_color: s("text-orange-400"),
                subtitle1_color: s("text-slate-300"),
                subtitle2_color: s("text-slate-400"),
            },
        },
        global_title_styling: GlobalTitleStyling {
            available_colors: vec![
                ColorPreset { name: s("Blue"), value: s("text-blue-400"), kind: ColorKind::Solid },
                ColorPreset { name: s("Green"), value: s("text-green-400"), kind: ColorKind::Solid },
                ColorPreset { name: s("White"), value: s("text-white"), kind: ColorKind::Solid },
                ColorPreset {
                    name: s("Blue → Purple"),
                    value: s("bg-gradient-to-r from-blue-400 to-purple-500 bg-clip-text text-transparent"),
                    kind: ColorKind::Gradient,
                },
            ],
        },
        global_background: GlobalBackground {
            background_class: s("bg-gradient-to-br from-blue-900 via-purple-900 to-indigo-900"),
            available_backgrounds: vec![
                BackgroundPreset {
                    name: s("Default Blue"),
                    class: s("bg-gradient-to-br from-blue-900 via-blue-800 to-indigo-900"),
                },
                BackgroundPreset { name: s("Solid Black"), class: s("bg-black") },
            ],
        },
        custom_ctas: CustomCtas {
            global_settings: CtaGlobalSettings {
                default_background_color: s("from-blue-600 to-purple-600"),
                default_text_color: s("text-white"),
                available_colors: vec![
                    CtaColor { name: s("Blue to Purple"), background: s("from-blue-600 to-purple-600") },
                    CtaColor { name: s("Green to Blue"), background: s("from-green-500 to-blue-600") },
                ],
            },
            doctor_trust_cta: cta("See What Professionals Recommend", "👨‍⚕️", "from-blue-600 to-purple-600"),
            success_story_cta: cta("Ready to Share Your Story?", "🚀", "from-green-500 to-blue-600"),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_content_has_every_section() {
        let doc = default_content();
        for name in [
            sections::TOP_BANNER,
            sections::VIDEO,
            sections::CONTENT_BLOCKER,
            sections::MAIN_OFFER,
            sections::ALTERNATIVE_OFFERS,
            sections::DOCTORS,
            sections::TESTIMONIALS,
            sections::NEWS,
            sections::GUARANTEE,
            sections::FAQ,
            sections::FOOTER,
            sections::TITLE_BLOCKS,
            sections::GLOBAL_TITLE_STYLING,
            sections::GLOBAL_BACKGROUND,
            sections::CUSTOM_CTAS,
        ] {
            assert!(doc.get(name).is_some(), "missing section {name}");
        }
        assert_eq!(doc.len(), 15);
    }

    #[test]
    fn default_content_decodes_back_to_typed_sections() {
        let doc = default_content();
        let typed = SiteContent::from_document(&doc);
        assert_eq!(typed.main_offer.product_name, "NORTHWIND");
        assert_eq!(typed.video.aspect_ratio, AspectRatio::Portrait);
        assert_eq!(typed.doctors.doctors.len(), 2);
    }

    #[test]
    fn section_names_use_camel_case() {
        let doc = default_content();
        let cta = doc.get(sections::CUSTOM_CTAS).unwrap();
        assert!(cta.get("doctorTrustCTA").is_some());
        assert_eq!(doc.get(sections::VIDEO).unwrap()["aspectRatio"], "9:16");
        assert_eq!(
            doc.get(sections::CONTENT_BLOCKER).unwrap()["scheduleMode"],
            "immediate"
        );
    }

    #[test]
    fn next_id_is_one_past_the_max() {
        let items = vec![json!({"id": 3}), json!({"id": 7}), json!({"id": 5})];
        assert_eq!(next_item_id(&items), Some(8));
    }

    #[test]
    fn next_id_is_none_at_the_top_of_the_range() {
        let items = vec![json!({"id": 1}), json!({"id": u64::MAX})];
        assert_eq!(next_item_id(&items), None);
    }

    #[test]
    fn next_id_starts_at_one() {
        assert_eq!(next_item_id(&[]), Some(1));
        assert_eq!(next_item_id(&[json!({"name": "no id"})]), Some(1));
    }

    #[test]
    fn item_list_parses_aliases() {
        assert_eq!("Doctors".parse::<ItemList>().unwrap(), ItemList::Doctors);
        assert_eq!("customers".parse::<ItemList>().unwrap(), ItemList::Testimonials);
        assert!("banner".parse::<ItemList>().is_err());
    }

    #[test]
    fn typed_section_tolerates_partial_data() {
        let mut doc = Document::new();
        doc.set_section(sections::TOP_BANNER, json!({"title": "X"}));
        let banner: TopBanner = doc.section(sections::TOP_BANNER).unwrap();
        assert_eq!(banner.title, "X");
        assert!(banner.subtitle.is_empty());
    }
}
