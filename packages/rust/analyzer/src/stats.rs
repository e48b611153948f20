//! Aggregate statistics over a listing batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use jobpulse_shared::{
    AggregateStats, CleanListing, ExperienceRange, KeywordCount, SalaryGroup, SalarySummary,
};

const TOP_COMPANIES: usize = 50;
const TOP_SKILLS: usize = 50;
const TOP_INDUSTRIES: usize = 20;
const CATEGORIES_WITH_SKILLS: usize = 20;
const SKILLS_PER_CATEGORY: usize = 10;

/// Count listings per category.
pub fn category_distribution(listings: &[CleanListing]) -> BTreeMap<String, u64> {
    distribution(listings.iter().map(|l| l.category.as_str()))
}

/// Compute every aggregate except the keyword table.
///
/// Cities with fewer than `min_city_samples` salaried listings are left out
/// of `salary_by_city`. Listings with unknown experience are left out of
/// `salary_by_experience`.
pub fn aggregate(listings: &[CleanListing], min_city_samples: usize) -> AggregateStats {
    let unique_companies = listings
        .iter()
        .map(|l| l.company.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let city_distribution = distribution(listings.iter().map(|l| l.city.as_str()));
    let categories = category_distribution(listings);

    let salaried: Vec<(&CleanListing, f64)> = listings
        .iter()
        .filter_map(|l| l.salary.map(|s| (l, s.midpoint())))
        .collect();
    let salary_by_city = salary_groups(&salaried, |l| Some(l.city.as_str()))
        .into_iter()
        .filter(|(_, group)| group.samples >= min_city_samples.max(1))
        .collect();

    AggregateStats {
        unique_companies,
        unique_cities: city_distribution.len(),
        education_distribution: distribution(listings.iter().map(|l| l.education.as_str())),
        experience_distribution: distribution(listings.iter().map(|l| experience_bucket(l.experience))),
        company_size_distribution: distribution(listings.iter().filter_map(|l| l.company_size.as_deref())),
        top_industries: top_counts(
            distribution(listings.iter().filter_map(|l| l.industry.as_deref())),
            TOP_INDUSTRIES,
        ),
        top_companies: top_counts(distribution(listings.iter().map(|l| l.company.as_str())), TOP_COMPANIES),
        top_skills: top_counts(skill_counts(listings.iter()), TOP_SKILLS),
        skills_by_category: top_counts(categories, CATEGORIES_WITH_SKILLS)
            .into_iter()
            .map(|category| {
                let members = listings.iter().filter(|l| l.category == category.keyword);
                let skills = top_counts(skill_counts(members), SKILLS_PER_CATEGORY);
                (category.keyword, skills)
            })
            .collect(),
        salary: summarize(salaried.iter().map(|(_, mid)| *mid).collect()),
        salary_by_city,
        salary_by_category: salary_groups(&salaried, |l| Some(l.category.as_str())),
        salary_by_experience: salary_groups(&salaried, |l| {
            l.experience.map(|e| experience_bucket(Some(e)))
        }),
        salary_by_education: salary_groups(&salaried, |l| Some(l.education.as_str())),
        city_distribution,
    }
}

/// Bucket by minimum years: 0 → 不限, (0,1] → 0-1年, (1,3] → 1-3年,
/// (3,5] → 3-5年, (5,10] → 5-10年, above → 10年以上.
pub fn experience_bucket(experience: Option<ExperienceRange>) -> &'static str {
    match experience.map(|e| e.min_years) {
        None => "未知",
        Some(0) => "不限",
        Some(1) => "0-1年",
        Some(2..=3) => "1-3年",
        Some(4..=5) => "3-5年",
        Some(6..=10) => "5-10年",
        Some(_) => "10年以上",
    }
}

fn distribution<'a>(values: impl Iterator<Item = &'a str>) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for value in values {
        *counts.entry(value.to_string()).or_default() += 1;
    }
    counts
}

fn top_counts(counts: BTreeMap<String, u64>, top: usize) -> Vec<KeywordCount> {
    let mut ranked: Vec<KeywordCount> = counts
        .into_iter()
        .map(|(keyword, count)| KeywordCount { keyword, count })
        .collect();
    // Stable sort keeps the BTreeMap's alphabetical order within equal counts.
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(top);
    ranked
}

/// Skills counted once per listing, case-folded.
fn skill_counts<'a>(listings: impl Iterator<Item = &'a CleanListing>) -> BTreeMap<String, u64> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for listing in listings {
        let per_listing: BTreeSet<String> = listing.skills.iter().map(|s| s.to_lowercase()).collect();
        for skill in per_listing {
            *counts.entry(skill).or_default() += 1;
        }
    }
    counts.into_iter().collect()
}

/// Group salary midpoints by `key`; listings whose key is `None` are skipped.
fn salary_groups<'a>(
    salaried: &[(&'a CleanListing, f64)],
    key: impl Fn(&'a CleanListing) -> Option<&'a str>,
) -> BTreeMap<String, SalaryGroup> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (listing, mid) in salaried {
        if let Some(k) = key(*listing) {
            groups.entry(k).or_default().push(*mid);
        }
    }
    groups
        .into_iter()
        .map(|(k, mut values)| {
            values.sort_by(f64::total_cmp);
            let group = SalaryGroup {
                samples: values.len(),
                mean: mean(&values),
                median: quantile(&values, 0.5),
                std_dev: std_dev(&values),
            };
            (k.to_string(), group)
        })
        .collect()
}

fn summarize(mut values: Vec<f64>) -> Option<SalarySummary> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(SalarySummary {
        samples: values.len(),
        mean: mean(&values),
        median: quantile(&values, 0.5),
        min: values[0],
        max: values[values.len() - 1],
        p25: quantile(&values, 0.25),
        p75: quantile(&values, 0.75),
        p90: quantile(&values, 0.9),
        std_dev: std_dev(&values),
    })
}

/// Sum in sorted order so the result does not depend on input order.
fn mean(sorted: &[f64]) -> f64 {
    sorted.iter().sum::<f64>() / sorted.len() as f64
}

/// Linear interpolation between closest ranks.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Sample standard deviation (n - 1), `None` below two values.
fn std_dev(sorted: &[f64]) -> Option<f64> {
    if sorted.len() < 2 {
        return None;
    }
    let mean = mean(sorted);
    let squares: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
    Some((squares / (sorted.len() - 1) as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobpulse_shared::SalaryRange;

    fn listing(company: &str, city: &str, salary: Option<(u32, u32)>, years: Option<u32>) -> CleanListing {
        CleanListing {
            identity_hash: format!("{company}-{city}-{salary:?}-{years:?}"),
            title: "工程师".into(),
            company: company.into(),
            city: city.into(),
            district: None,
            salary: salary.map(|(min_monthly, max_monthly)| SalaryRange {
                min_monthly,
                max_monthly,
                annualized: false,
            }),
            category: "后端开发工程师".into(),
            posted_date: None,
            description: String::new(),
            experience: years.map(|min_years| ExperienceRange {
                min_years,
                max_years: None,
            }),
            education: "本科".into(),
            industry: None,
            company_size: None,
            skills: vec!["Rust".into(), "rust".into(), "Go".into()],
            source_id: "t".into(),
            source_url: "https://example.com".into(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn quantiles_interpolate() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(quantile(&values, 0.5), 25.0);
        assert_eq!(quantile(&values, 0.25), 17.5);
        assert_eq!(quantile(&[7.0], 0.9), 7.0);
    }

    #[test]
    fn experience_buckets_follow_minimum_years() {
        let bucket = |y| experience_bucket(Some(ExperienceRange { min_years: y, max_years: None }));
        assert_eq!(bucket(0), "不限");
        assert_eq!(bucket(1), "0-1年");
        assert_eq!(bucket(3), "1-3年");
        assert_eq!(bucket(5), "3-5年");
        assert_eq!(bucket(8), "5-10年");
        assert_eq!(bucket(15), "10年以上");
        assert_eq!(experience_bucket(None), "未知");
    }

    #[test]
    fn aggregates_batch() {
        let listings = vec![
            listing("甲", "北京", Some((10_000, 20_000)), Some(3)),
            listing("甲", "北京", Some((20_000, 30_000)), Some(5)),
            listing("乙", "上海", None, None),
            listing("丙", "上海", Some((30_000, 50_000)), Some(0)),
        ];
        let stats = aggregate(&listings, 2);

        assert_eq!(stats.unique_companies, 3);
        assert_eq!(stats.unique_cities, 2);
        assert_eq!(stats.city_distribution["上海"], 2);
        assert_eq!(stats.top_companies[0], KeywordCount { keyword: "甲".into(), count: 2 });
        assert_eq!(stats.top_skills[0], KeywordCount { keyword: "go".into(), count: 4 });
        assert_eq!(stats.top_skills[1], KeywordCount { keyword: "rust".into(), count: 4 });
        assert_eq!(stats.experience_distribution["未知"], 1);

        let salary = stats.salary.unwrap();
        assert_eq!(salary.samples, 3);
        assert_eq!(salary.median, 25_000.0);
        assert_eq!(salary.min, 15_000.0);
        assert_eq!(salary.max, 40_000.0);

        // 上海 has only one salaried listing.
        assert_eq!(stats.salary_by_city.len(), 1);
        assert_eq!(stats.salary_by_city["北京"].mean, 20_000.0);
        assert_eq!(stats.salary_by_city["北京"].samples, 2);
    }

    #[test]
    fn salary_groups_and_company_profile() {
        let mut data = listing("甲", "北京", Some((20_000, 30_000)), Some(3));
        data.category = "数据分析师".into();
        data.education = "硕士".into();
        data.skills = vec!["Python".into(), "SQL".into()];
        data.industry = Some("金融".into());
        data.company_size = Some("1000-9999人".into());

        let mut small = listing("乙", "上海", Some((10_000, 20_000)), Some(1));
        small.industry = Some("互联网".into());
        small.company_size = Some("20-99人".into());

        let listings = vec![
            listing("甲", "北京", Some((10_000, 20_000)), Some(3)),
            listing("丙", "北京", Some((20_000, 30_000)), None),
            small,
            data,
        ];
        let stats = aggregate(&listings, 10);

        let backend = &stats.salary_by_category["后端开发工程师"];
        assert_eq!(backend.samples, 3);
        assert_eq!(backend.mean, 55_000.0 / 3.0);
        assert_eq!(backend.median, 15_000.0);
        assert!((backend.std_dev.unwrap() - 5_773.502_691_896_258).abs() < 1e-6);
        assert_eq!(stats.salary_by_category["数据分析师"].std_dev, None);

        // Unknown experience is not a bucket of its own.
        assert!(!stats.salary_by_experience.contains_key("未知"));
        assert_eq!(stats.salary_by_experience["1-3年"].samples, 2);
        assert_eq!(stats.salary_by_experience["0-1年"].mean, 15_000.0);

        assert_eq!(stats.salary_by_education["硕士"].mean, 25_000.0);
        assert_eq!(stats.salary_by_education["本科"].samples, 3);
        assert!(stats.salary_by_city.is_empty());

        assert_eq!(stats.company_size_distribution.len(), 2);
        assert_eq!(stats.company_size_distribution["20-99人"], 1);
        assert_eq!(
            stats.top_industries,
            vec![
                KeywordCount { keyword: "互联网".into(), count: 1 },
                KeywordCount { keyword: "金融".into(), count: 1 },
            ]
        );

        assert_eq!(stats.skills_by_category["数据分析师"][0].keyword, "python");
        assert_eq!(stats.skills_by_category["后端开发工程师"][0], KeywordCount { keyword: "go".into(), count: 3 });
    }

    #[test]
    fn empty_batch_has_no_salary() {
        let stats = aggregate(&[], 10);
        assert_eq!(stats, AggregateStats::default());
    }
}
