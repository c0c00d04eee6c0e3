use mintwatch_core::{BotSettings, Intent};

pub const LINK_PLACEHOLDER: &str = "{link}";

pub const DEFAULT_CREATION_TEMPLATE: &str =
    "🎨 Need custom NFT art? Check my Fiverr gig 👉 {link} 👈 and let's bring your vision to life!";
pub const DEFAULT_MINTING_TEMPLATE: &str =
    "🚀 Ready to mint your NFT collection? See my Fiverr service 👉 {link} 👈 to get started!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTemplates {
    pub link: String,
    pub creation: String,
    pub minting: String,
}

impl ReplyTemplates {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            creation: DEFAULT_CREATION_TEMPLATE.to_string(),
            minting: DEFAULT_MINTING_TEMPLATE.to_string(),
        }
    }

    pub fn from_settings(settings: &BotSettings) -> Self {
        let mut templates = Self::new(settings.promo_link.clone());
        if let Some(creation) = &settings.creation_template {
            templates.creation = creation.clone();
        }
        if let Some(minting) = &settings.minting_template {
            templates.minting = minting.clone();
        }
        templates
    }

    /// Creation gets the art pitch; anything else falls back to the minting pitch.
    pub fn render(&self, intent: Intent) -> String {
        let template = match intent {
            Intent::Creation => &self.creation,
            _ => &self.minting,
        };
        template.replace(LINK_PLACEHOLDER, &self.link)
    }
}
