// src/agents/mod.rs
//
// The agent roster. Every LLM call in the engine goes through a role: the
// role picks the system prompt, and the invoker handles transport, retry,
// and JSON extraction uniformly.

pub mod invoker;
pub mod prompts;

pub use invoker::{AgentInvoker, AgentResponse, HistoryTurn, InvocationContext, TurnRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    ProjectManager,
    ResearchAgent,
    AudienceAnalyst,
    ContentWriter,
    ContentManager,
    LeadStrategist,
    IntegrationManager,
    CampaignManager,
    GrowthManager,
    SeoStrategist,
    SocialDistribution,
    PerformanceAnalyst,
    Cso,
    Cmo,
    Crco,
    EventScout,
}

impl AgentRole {
    /// Stable identifier used in step names, run records, and workflow plans.
    pub fn slug(&self) -> &'static str {
        match self {
            AgentRole::ProjectManager => "project_manager",
            AgentRole::ResearchAgent => "research_agent",
            AgentRole::AudienceAnalyst => "audience_analyst",
            AgentRole::ContentWriter => "content_writer",
            AgentRole::ContentManager => "content_manager",
            AgentRole::LeadStrategist => "lead_strategist",
            AgentRole::IntegrationManager => "integration_manager",
            AgentRole::CampaignManager => "campaign_manager",
            AgentRole::GrowthManager => "growth_manager",
            AgentRole::SeoStrategist => "seo_strategist",
            AgentRole::SocialDistribution => "social_distribution",
            AgentRole::PerformanceAnalyst => "performance_analyst",
            AgentRole::Cso => "cso",
            AgentRole::Cmo => "cmo",
            AgentRole::Crco => "crco",
            AgentRole::EventScout => "event_scout",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentRole::ProjectManager => "Project Manager",
            AgentRole::ResearchAgent => "Research Agent",
            AgentRole::AudienceAnalyst => "Audience Analyst",
            AgentRole::ContentWriter => "Content Writer",
            AgentRole::ContentManager => "Content Manager",
            AgentRole::LeadStrategist => "Lead Strategist",
            AgentRole::IntegrationManager => "Integration Manager",
            AgentRole::CampaignManager => "Campaign Manager",
            AgentRole::GrowthManager => "Growth Manager",
            AgentRole::SeoStrategist => "SEO Strategist",
            AgentRole::SocialDistribution => "Social Distribution Manager",
            AgentRole::PerformanceAnalyst => "Performance Analyst",
            AgentRole::Cso => "Chief Strategy Officer",
            AgentRole::Cmo => "Chief Marketing Officer",
            AgentRole::Crco => "Chief Risk & Compliance Officer",
            AgentRole::EventScout => "Event Scout",
        }
    }

    pub const ALL: [AgentRole; 16] = [
        AgentRole::ProjectManager,
        AgentRole::ResearchAgent,
        AgentRole::AudienceAnalyst,
        AgentRole::ContentWriter,
        AgentRole::ContentManager,
        AgentRole::LeadStrategist,
        AgentRole::IntegrationManager,
        AgentRole::CampaignManager,
        AgentRole::GrowthManager,
        AgentRole::SeoStrategist,
        AgentRole::SocialDistribution,
        AgentRole::PerformanceAnalyst,
        AgentRole::Cso,
        AgentRole::Cmo,
        AgentRole::Crco,
        AgentRole::EventScout,
    ];

    /// Looks a role up by its slug, as emitted in workflow plans.
    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.slug() == slug)
    }

    /// The three executives whose unanimous approval gates a campaign.
    pub const EXECUTIVES: [AgentRole; 3] = [AgentRole::Cso, AgentRole::Cmo, AgentRole::Crco];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_round_trip() {
        for role in AgentRole::ALL {
            assert_eq!(AgentRole::from_slug(role.slug()), Some(role));
        }
        assert_eq!(AgentRole::from_slug("unknown_role"), None);
    }

    #[test]
    fn every_role_has_a_prompt() {
        for role in AgentRole::ALL {
            assert!(!prompts::system_prompt(role).is_empty());
        }
    }
}
