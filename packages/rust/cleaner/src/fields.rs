//! Parsers for the smaller structured fields: experience, education,
//! location, category, and skills.

use std::sync::LazyLock;

use regex::Regex;

use jobpulse_shared::ExperienceRange;

use crate::normalize::normalize_text;

pub const UNKNOWN: &str = "未知";
pub const OTHER_CATEGORY: &str = "其他";

// ---------------------------------------------------------------------------
// Experience
// ---------------------------------------------------------------------------

static EXP_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:-|~|至|到)\s*(\d+)\s*年").expect("experience range regex"));
static EXP_MIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*年以上").expect("experience min regex"));
static EXP_MAX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*年(?:以下|以内)").expect("experience max regex"));

/// `3-5年`, `3年以上`, `5年以下`, `应届`/`毕业生`, `经验不限`.
pub fn parse_experience(text: &str) -> Option<ExperienceRange> {
    let text = text.trim();
    if let Some(caps) = EXP_RANGE.captures(text) {
        let a: u32 = caps[1].parse().ok()?;
        let b: u32 = caps[2].parse().ok()?;
        return Some(ExperienceRange {
            min_years: a.min(b),
            max_years: Some(a.max(b)),
        });
    }
    if let Some(caps) = EXP_MIN.captures(text) {
        return Some(ExperienceRange {
            min_years: caps[1].parse().ok()?,
            max_years: None,
        });
    }
    if let Some(caps) = EXP_MAX.captures(text) {
        return Some(ExperienceRange {
            min_years: 0,
            max_years: Some(caps[1].parse().ok()?),
        });
    }
    if text.contains("应届") || text.contains("毕业生") || text.contains("在校") {
        return Some(ExperienceRange {
            min_years: 0,
            max_years: Some(1),
        });
    }
    if text.contains("不限") {
        return Some(ExperienceRange {
            min_years: 0,
            max_years: None,
        });
    }
    None
}

// ---------------------------------------------------------------------------
// Education
// ---------------------------------------------------------------------------

/// Checked in order; the first substring match wins.
const EDUCATION_LEVELS: &[(&str, &str)] = &[
    ("博士", "博士"),
    ("硕士", "硕士"),
    ("研究生", "硕士"),
    ("本科", "本科"),
    ("学士", "本科"),
    ("大专", "大专"),
    ("专科", "大专"),
    ("中专", "中专"),
    ("中技", "中专"),
    ("高中", "高中"),
    ("不限", "不限"),
];

pub fn normalize_education(text: &str) -> String {
    EDUCATION_LEVELS
        .iter()
        .find(|(needle, _)| text.contains(needle))
        .map_or(UNKNOWN, |(_, level)| level)
        .to_string()
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// `上海-浦东新区`, `北京·海淀区`, `广州市天河区`, `北京` → (city, district).
pub fn parse_location(text: &str) -> (String, Option<String>) {
    let text = text.trim();
    if text.is_empty() {
        return (UNKNOWN.to_string(), None);
    }

    for sep in ['-', '·', ',', '，', '/', ' ', '市'] {
        if let Some((city, district)) = text.split_once(sep) {
            let city = strip_city_suffix(city.trim());
            let district = district.trim();
            if city.is_empty() {
                continue;
            }
            let district = (!district.is_empty()).then(|| district.to_string());
            return (city, district);
        }
    }
    (strip_city_suffix(text), None)
}

fn strip_city_suffix(city: &str) -> String {
    city.strip_suffix('市').unwrap_or(city).to_string()
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Title patterns, checked in order against the lowercased title. More
/// specific roles come first so `python数据分析` lands on the analyst row
/// and `javascript` never reaches the Java row.
static CATEGORY_TABLE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"算法|机器学习|深度学习|人工智能|(?:^|[^a-z])ai(?:[^a-z]|$)", "算法工程师"),
        (r"数据分析|数据挖掘|大数据分析|bi工程师", "数据分析师"),
        (r"前端|web前端|h5|javascript|typescript|react|vue", "前端开发工程师"),
        (r"全栈", "全栈开发工程师"),
        (r"测试|(?:^|[^a-z])qa(?:[^a-z]|$)", "测试工程师"),
        (r"运维|devops|(?:^|[^a-z])sre(?:[^a-z]|$)", "运维工程师"),
        (r"架构师", "架构师"),
        (r"安全", "安全工程师"),
        (r"数据库|dba", "数据库工程师"),
        (r"java", "Java开发工程师"),
        (r"python", "Python开发工程师"),
        (r"后端|后台|服务端|服务器端|golang|rust|c\+\+", "后端开发工程师"),
        (r"产品经理|产品专员|(?:^|[^a-z])pm(?:[^a-z]|$)", "产品经理"),
        (r"(?:^|[^a-z])ui(?:[^a-z]|$)|交互设计|视觉设计", "UI设计师"),
        (r"项目经理|项目管理", "项目经理"),
    ]
    .into_iter()
    .map(|(pattern, category)| (Regex::new(pattern).expect("category regex"), category))
    .collect()
});

/// Explicit category text wins; otherwise classify the title.
pub fn categorize(explicit: Option<&str>, title: &str) -> String {
    if let Some(category) = explicit.map(normalize_text).filter(|c| !c.is_empty()) {
        return category;
    }
    let lowered = title.to_lowercase();
    CATEGORY_TABLE
        .iter()
        .find(|(pattern, _)| pattern.is_match(&lowered))
        .map_or(OTHER_CATEGORY, |(_, category)| category)
        .to_string()
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

/// Display names of recognized skills. Matching is case-insensitive and,
/// for ASCII names, bounded so `go` does not match inside `google`.
const SKILL_VOCABULARY: &[&str] = &[
    "Python", "Java", "C++", "C#", "JavaScript", "TypeScript", "Go", "Golang", "Rust", "PHP",
    "Swift", "Kotlin", "Scala", "SQL", "HTML", "CSS", "React", "Vue", "Angular", "jQuery",
    "Webpack", "Node.js", "Django", "Flask", "Spring", "Spring Boot", "Express", "Laravel",
    "MySQL", "PostgreSQL", "MongoDB", "Redis", "Oracle", "SQLite", "Elasticsearch", "Kafka",
    "Hadoop", "Spark", "Hive", "Flink", "TensorFlow", "PyTorch", "Keras", "scikit-learn",
    "Pandas", "NumPy", "Tableau", "Excel", "Docker", "Kubernetes", "AWS", "Azure", "GCP",
    "Jenkins", "Git", "CI/CD", "Linux", "Tokio", "Android", "iOS", "Flutter", "React Native",
    "微服务", "分布式", "机器学习", "深度学习", "自然语言处理", "计算机视觉", "数据挖掘",
    "大数据", "云计算", "设计模式", "RESTful", "GraphQL",
];

pub const MAX_SKILLS: usize = 20;

/// Skills listed explicitly by the source come first, then vocabulary matches
/// in `text`, without case-insensitive duplicates.
pub fn extract_skills(explicit: Option<&str>, text: &str) -> Vec<String> {
    let mut skills: Vec<String> = Vec::new();
    let mut push = |skill: String| {
        if !skill.is_empty()
            && !skills.iter().any(|s| s.eq_ignore_ascii_case(&skill))
            && skills.len() < MAX_SKILLS
        {
            skills.push(skill);
        }
    };

    if let Some(explicit) = explicit {
        explicit
            .split([',', '，', '、', '/', '|', ';'])
            .map(normalize_text)
            .for_each(&mut push);
    }

    let haystack = text.to_lowercase();
    for skill in SKILL_VOCABULARY {
        if contains_term(&haystack, &skill.to_lowercase()) {
            push((*skill).to_string());
        }
    }
    skills
}

/// Whether `term` occurs in `haystack` without ASCII letters or digits
/// directly on either side.
fn contains_term(haystack: &str, term: &str) -> bool {
    let is_word = |c: char| c.is_ascii_alphanumeric();
    haystack.match_indices(term).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}
