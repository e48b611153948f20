//! Listing cleaner: raw field maps → canonical, validated, deduplicated
//! [`CleanListing`]s.
//!
//! This crate provides:
//! - [`clean`]: the batch entry point
//! - [`identity_hash`]: the deduplication key
//! - field parsers ([`salary`], [`dates`], [`fields`]) and [`normalize`]

pub mod dates;
pub mod fields;
pub mod normalize;
pub mod salary;

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use jobpulse_shared::{CleanListing, RawListing, RejectedListing, ValidationFailure};

pub use dates::{local_fetch_date, parse_posted_date};
pub use fields::{categorize, extract_skills, normalize_education, parse_experience, parse_location};
pub use normalize::{normalize_key, normalize_text};
pub use salary::parse_salary;

/// Field names looked up in a raw payload, in preference order.
mod keys {
    pub const TITLE: &[&str] = &["title", "position"];
    pub const COMPANY: &[&str] = &["company"];
    pub const LOCATION: &[&str] = &["location", "city"];
    pub const DISTRICT: &[&str] = &["district"];
    pub const SALARY: &[&str] = &["salary"];
    pub const CATEGORY: &[&str] = &["category"];
    pub const POSTED: &[&str] = &["posted", "posted_date", "date"];
    pub const DESCRIPTION: &[&str] = &["description"];
    pub const REQUIREMENT: &[&str] = &["requirement"];
    pub const EXPERIENCE: &[&str] = &["experience"];
    pub const EDUCATION: &[&str] = &["education"];
    pub const INDUSTRY: &[&str] = &["industry"];
    pub const COMPANY_SIZE: &[&str] = &["company_size"];
    pub const SKILLS: &[&str] = &["skills"];
}

/// Result of cleaning one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanOutcome {
    /// Unique listings, sorted by identity hash.
    pub listings: Vec<CleanListing>,
    /// Records missing a required field.
    pub rejected: Vec<RejectedListing>,
    /// Valid records superseded by a later record with the same identity.
    pub duplicates: usize,
}

/// Clean a batch of raw listings.
///
/// On identity collisions within the batch the record with the later
/// `fetched_at` wins; on equal timestamps the later one in input order wins.
#[instrument(skip_all, fields(raw = raw.len()))]
pub fn clean(raw: Vec<RawListing>) -> CleanOutcome {
    let mut rejected = Vec::new();
    let mut accepted = 0usize;
    let mut by_identity: HashMap<String, CleanListing> = HashMap::new();

    for listing in raw {
        match clean_one(&listing) {
            Ok(clean) => {
                accepted += 1;
                match by_identity.get(&clean.identity_hash) {
                    Some(existing) if existing.fetched_at > clean.fetched_at => {
                        debug!(hash = %clean.identity_hash, "older duplicate dropped");
                    }
                    _ => {
                        by_identity.insert(clean.identity_hash.clone(), clean);
                    }
                }
            }
            Err(reason) => {
                debug!(%reason, source = %listing.source_id, "listing rejected");
                rejected.push(RejectedListing { listing, reason });
            }
        }
    }

    let listings: Vec<CleanListing> = by_identity
        .into_iter()
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect();
    let duplicates = accepted - listings.len();

    info!(
        unique = listings.len(),
        rejected = rejected.len(),
        duplicates,
        "cleaning completed"
    );

    CleanOutcome {
        listings,
        rejected,
        duplicates,
    }
}

/// Normalize and validate a single raw listing.
pub fn clean_one(raw: &RawListing) -> Result<CleanListing, ValidationFailure> {
    let text = |names: &[&str]| -> Option<String> {
        names
            .iter()
            .find_map(|name| raw.field(name))
            .map(normalize_text)
            .filter(|v| !v.is_empty())
    };

    let title = text(keys::TITLE).ok_or(ValidationFailure::MissingTitle)?;
    let company = text(keys::COMPANY).ok_or(ValidationFailure::MissingCompany)?;

    let (city, parsed_district) = parse_location(&text(keys::LOCATION).unwrap_or_default());
    let district = text(keys::DISTRICT).or(parsed_district);

    let posted_date = text(keys::POSTED).and_then(|p| parse_posted_date(&p, raw.fetched_at));

    let description = match (text(keys::DESCRIPTION), text(keys::REQUIREMENT)) {
        (Some(d), Some(r)) => format!("{d} {r}"),
        (d, r) => d.or(r).unwrap_or_default(),
    };

    let explicit_skills = text(keys::SKILLS);
    let skills = extract_skills(explicit_skills.as_deref(), &format!("{title} {description}"));

    Ok(CleanListing {
        identity_hash: identity_hash(&company, &title, posted_date),
        category: categorize(text(keys::CATEGORY).as_deref(), &title),
        salary: text(keys::SALARY).and_then(|s| parse_salary(&s)),
        experience: text(keys::EXPERIENCE).and_then(|e| parse_experience(&e)),
        education: normalize_education(&text(keys::EDUCATION).unwrap_or_default()),
        industry: text(keys::INDUSTRY),
        company_size: text(keys::COMPANY_SIZE),
        title,
        company,
        city,
        district,
        posted_date,
        description,
        skills,
        source_id: raw.source_id.clone(),
        source_url: raw.source_url.clone(),
        fetched_at: raw.fetched_at,
    })
}

/// SHA-256 over normalized company, title, and posted date (hex).
///
/// Case, width, and whitespace differences do not change the hash.
pub fn identity_hash(company: &str, title: &str, posted_date: Option<NaiveDate>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_key(company).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize_key(title).as_bytes());
    hasher.update([0x1f]);
    if let Some(date) = posted_date {
        hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap()
    }

    fn raw(fields: &[(&str, &str)], fetched_at: DateTime<Utc>) -> RawListing {
        RawListing {
            source_url: "https://jobs.example.com/search?kw=rust".into(),
            source_id: "mock".into(),
            payload: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            fetched_at,
        }
    }

    #[test]
    fn normalizes_all_fields() {
        let listing = clean_one(&raw(
            &[
                ("title", " Ｒｕｓｔ  后端开发工程师 "),
                ("company", "星河科技"),
                ("location", "上海-浦东新区"),
                ("salary", "20k-35k·14薪"),
                ("posted", "昨天"),
                ("experience", "3-5年"),
                ("education", "本科及以上"),
                ("description", "熟悉 Tokio 与 Linux"),
                ("industry", "互联网"),
            ],
            at(2),
        ))
        .unwrap();

        assert_eq!(listing.title, "Rust 后端开发工程师");
        assert_eq!(listing.city, "上海");
        assert_eq!(listing.district.as_deref(), Some("浦东新区"));
        assert_eq!(listing.salary.map(|s| s.min_monthly), Some(20_000));
        assert_eq!(listing.posted_date, NaiveDate::from_ymd_opt(2024, 5, 9));
        assert_eq!(listing.experience.map(|e| e.min_years), Some(3));
        assert_eq!(listing.education, "本科");
        assert_eq!(listing.category, "后端开发工程师");
        assert_eq!(listing.skills, vec!["Rust", "Linux", "Tokio"]);
        assert_eq!(listing.industry.as_deref(), Some("互联网"));
        assert_eq!(listing.company_size, None);
    }

    #[test]
    fn missing_required_fields_are_rejected_with_reason() {
        let outcome = clean(vec![
            raw(&[("company", "甲公司")], at(1)),
            raw(&[("title", "测试工程师"), ("company", "   ")], at(1)),
            raw(&[("title", "测试工程师"), ("company", "甲公司")], at(1)),
        ]);
        assert_eq!(outcome.listings.len(), 1);
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.rejected[0].reason, ValidationFailure::MissingTitle);
        assert_eq!(outcome.rejected[1].reason, ValidationFailure::MissingCompany);
    }

    #[test]
    fn later_fetch_wins_identity_collision() {
        let outcome = clean(vec![
            raw(
                &[("title", "数据分析师"), ("company", "蓝海数据"), ("posted", "2024-05-01"), ("salary", "10k-15k")],
                at(5),
            ),
            raw(
                &[("title", "数据分析师"), ("company", "蓝海数据"), ("posted", "2024-05-01"), ("salary", "15k-25k")],
                at(1),
            ),
            raw(
                &[("title", "算法工程师"), ("company", "蓝海数据"), ("posted", "2024-05-01")],
                at(3),
            ),
        ]);

        assert_eq!(outcome.listings.len(), 2);
        assert_eq!(outcome.duplicates, 1);
        let analyst = outcome
            .listings
            .iter()
            .find(|l| l.title == "数据分析师")
            .unwrap();
        assert_eq!(analyst.fetched_at, at(5));
        assert_eq!(analyst.salary.map(|s| s.max_monthly), Some(15_000));
    }

    #[test]
    fn equal_timestamps_keep_later_input() {
        let outcome = clean(vec![
            raw(&[("title", "Go 开发"), ("company", "甲"), ("salary", "10k-12k")], at(1)),
            raw(&[("title", "go 开发"), ("company", "甲"), ("salary", "20k-22k")], at(1)),
        ]);
        assert_eq!(outcome.listings.len(), 1);
        assert_eq!(outcome.listings[0].salary.map(|s| s.min_monthly), Some(20_000));
    }

    #[test]
    fn output_is_sorted_by_identity() {
        let outcome = clean(
            (0..10)
                .map(|i| raw(&[("title", format!("职位{i}").as_str()), ("company", "甲")], at(1)))
                .collect(),
        );
        let hashes: Vec<_> = outcome.listings.iter().map(|l| &l.identity_hash).collect();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);
    }

    #[test]
    fn identity_ignores_case_width_and_spacing() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1);
        assert_eq!(
            identity_hash("ＡＢＣ 科技", "Rust  工程师", date),
            identity_hash("abc 科技", "rust 工程师", date)
        );
        assert_ne!(
            identity_hash("abc", "rust", date),
            identity_hash("abc", "rust", None)
        );
        assert_eq!(identity_hash("a", "b", None).len(), 64);
    }
}
