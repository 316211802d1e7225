//! Role-family and seniority taxonomies
//!
//! Keyword-driven detection used by the requirements builder (to fill gaps
//! the jd digest leaves open) and by the ranker (to compare candidates
//! against the target family and level).

use serde::{Deserialize, Serialize};

/// Engineering role families recognized by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleFamily {
    Frontend,
    Backend,
    Fullstack,
    Mobile,
    Data,
    Devops,
    Qa,
    Security,
}

impl RoleFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Fullstack => "fullstack",
            Self::Mobile => "mobile",
            Self::Data => "data",
            Self::Devops => "devops",
            Self::Qa => "qa",
            Self::Security => "security",
        }
    }

    /// Human-facing term used when composing search queries.
    pub fn search_term(&self) -> &'static str {
        match self {
            Self::Frontend => "frontend developer",
            Self::Backend => "backend engineer",
            Self::Fullstack => "full stack engineer",
            Self::Mobile => "mobile developer",
            Self::Data => "data engineer",
            Self::Devops => "devops engineer",
            Self::Qa => "qa engineer",
            Self::Security => "security engineer",
        }
    }
}

impl std::str::FromStr for RoleFamily {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], " ").as_str() {
            "frontend" | "front end" => Ok(Self::Frontend),
            "backend" | "back end" => Ok(Self::Backend),
            "fullstack" | "full stack" => Ok(Self::Fullstack),
            "mobile" | "android" | "ios" => Ok(Self::Mobile),
            "data" | "data engineering" | "ml" | "machine learning" => Ok(Self::Data),
            "devops" | "sre" | "platform" => Ok(Self::Devops),
            "qa" | "quality" | "sdet" => Ok(Self::Qa),
            "security" | "infosec" => Ok(Self::Security),
            _ => Err(()),
        }
    }
}

/// Detect a role family from free text (job title or candidate headline).
/// Order matters: fullstack before frontend/backend so "full stack
/// developer" doesn't resolve to the first side mentioned.
pub fn detect_role_family(text: &str) -> Option<RoleFamily> {
    let lowered = text.to_lowercase();
    let has = |needle: &str| lowered.contains(needle);

    if has("full stack") || has("fullstack") || has("full-stack") {
        return Some(RoleFamily::Fullstack);
    }
    if has("frontend") || has("front end") || has("front-end") || has("react developer") || has("ui engineer") {
        return Some(RoleFamily::Frontend);
    }
    if has("backend") || has("back end") || has("back-end") || has("server side") {
        return Some(RoleFamily::Backend);
    }
    if has("android") || has("ios ") || lowered.ends_with("ios") || has("mobile") || has("flutter") {
        return Some(RoleFamily::Mobile);
    }
    if has("data engineer") || has("data scientist") || has("machine learning") || has("ml engineer") {
        return Some(RoleFamily::Data);
    }
    if has("devops") || has("site reliability") || has("sre") || has("platform engineer") {
        return Some(RoleFamily::Devops);
    }
    if has("qa ") || has("quality assurance") || has("sdet") || has("test engineer") {
        return Some(RoleFamily::Qa);
    }
    if has("security engineer") || has("application security") || has("infosec") || has("penetration test") {
        return Some(RoleFamily::Security);
    }
    // Generic engineering titles default to backend-shaped work only when
    // they say "engineer"/"developer" with a software qualifier.
    if has("software engineer") || has("software developer") {
        return Some(RoleFamily::Backend);
    }
    None
}

/// Fixed seniority ladder; adjacency is distance on this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeniorityBand {
    Intern,
    Junior,
    Mid,
    Senior,
    Lead,
    Principal,
    Director,
    Executive,
}

impl SeniorityBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intern => "intern",
            Self::Junior => "junior",
            Self::Mid => "mid",
            Self::Senior => "senior",
            Self::Lead => "lead",
            Self::Principal => "principal",
            Self::Director => "director",
            Self::Executive => "executive",
        }
    }

    fn rung(&self) -> i32 {
        match self {
            Self::Intern => 0,
            Self::Junior => 1,
            Self::Mid => 2,
            Self::Senior => 3,
            Self::Lead => 4,
            Self::Principal => 5,
            Self::Director => 6,
            Self::Executive => 7,
        }
    }

    /// Rungs between two bands on the ladder.
    pub fn distance(&self, other: &Self) -> u32 {
        (self.rung() - other.rung()).unsigned_abs()
    }
}

impl std::str::FromStr for SeniorityBand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "intern" | "internship" | "trainee" => Ok(Self::Intern),
            "junior" | "jr" | "entry" | "entry level" | "associate" => Ok(Self::Junior),
            "mid" | "mid level" | "intermediate" => Ok(Self::Mid),
            "senior" | "sr" => Ok(Self::Senior),
            "lead" | "staff" | "team lead" => Ok(Self::Lead),
            "principal" | "architect" => Ok(Self::Principal),
            "director" | "head" => Ok(Self::Director),
            "executive" | "vp" | "cto" | "cxo" => Ok(Self::Executive),
            _ => Err(()),
        }
    }
}

/// Detect a seniority band from free text. More specific markers first so
/// "senior staff engineer" lands on the staff rung.
pub fn detect_seniority(text: &str) -> Option<SeniorityBand> {
    let lowered = text.to_lowercase();
    let has = |needle: &str| {
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == needle)
    };

    if has("cto") || has("vp") || lowered.contains("vice president") {
        return Some(SeniorityBand::Executive);
    }
    if has("director") || lowered.contains("head of") {
        return Some(SeniorityBand::Director);
    }
    if has("principal") || has("architect") {
        return Some(SeniorityBand::Principal);
    }
    if has("staff") || has("lead") {
        return Some(SeniorityBand::Lead);
    }
    if has("senior") || has("sr") {
        return Some(SeniorityBand::Senior);
    }
    if has("junior") || has("jr") || lowered.contains("entry level") || has("associate") {
        return Some(SeniorityBand::Junior);
    }
    if has("intern") || has("trainee") {
        return Some(SeniorityBand::Intern);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_role_family() {
        assert_eq!(detect_role_family("Senior Backend Engineer"), Some(RoleFamily::Backend));
        assert_eq!(detect_role_family("Full Stack Developer"), Some(RoleFamily::Fullstack));
        assert_eq!(detect_role_family("Frontend Engineer (React)"), Some(RoleFamily::Frontend));
        assert_eq!(detect_role_family("Site Reliability Engineer"), Some(RoleFamily::Devops));
        assert_eq!(detect_role_family("Account Executive"), None);
    }

    #[test]
    fn test_detect_seniority_specific_first() {
        assert_eq!(detect_seniority("Senior Staff Engineer"), Some(SeniorityBand::Lead));
        assert_eq!(detect_seniority("Senior Backend Engineer"), Some(SeniorityBand::Senior));
        assert_eq!(detect_seniority("Principal Architect"), Some(SeniorityBand::Principal));
        assert_eq!(detect_seniority("Engineer"), None);
    }

    #[test]
    fn test_seniority_distance() {
        assert_eq!(SeniorityBand::Senior.distance(&SeniorityBand::Senior), 0);
        assert_eq!(SeniorityBand::Senior.distance(&SeniorityBand::Lead), 1);
        assert_eq!(SeniorityBand::Junior.distance(&SeniorityBand::Principal), 4);
    }

    #[test]
    fn test_band_round_trip() {
        for band in [
            SeniorityBand::Intern,
            SeniorityBand::Mid,
            SeniorityBand::Lead,
            SeniorityBand::Executive,
        ] {
            assert_eq!(band.as_str().parse::<SeniorityBand>(), Ok(band));
        }
    }
}
