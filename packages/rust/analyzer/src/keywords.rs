//! Segmentation, stop-word filtering, and keyword ranking.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use jieba_rs::Jieba;
use tracing::{debug, warn};

use jobpulse_cleaner::normalize::fold_width;
use jobpulse_shared::{JobPulseError, KeywordCount, Result};

/// Terms the default dictionary would split apart.
const TECH_TERMS: &[&str] = &[
    "人工智能", "机器学习", "深度学习", "数据挖掘", "自然语言处理", "计算机视觉", "大数据",
    "云计算", "区块链", "物联网", "前端开发", "后端开发", "全栈开发", "移动开发", "微服务",
    "分布式", "DevOps", "Python", "Java", "C++", "JavaScript", "TypeScript", "Go", "Rust",
    "PHP", "C#", "React", "Vue", "Angular", "Node.js", "Django", "Flask", "TensorFlow",
    "PyTorch", "Hadoop", "Spark", "Kubernetes", "Docker",
];

/// Function words and job-ad boilerplate that carry no signal.
const BUILTIN_STOP_WORDS: &[&str] = &[
    "的", "了", "和", "与", "及", "或", "等", "在", "是", "有", "对", "为", "能", "会", "将",
    "并", "也", "就", "都", "而", "及其", "以及", "我们", "你", "您", "我", "他", "她", "其",
    "该", "此", "这", "那", "一", "个", "上", "中", "下", "以上", "以下", "优先", "具有", "具备",
    "良好", "能力", "经验", "熟悉", "熟练", "掌握", "了解", "精通", "要求", "岗位", "职责",
    "任职", "进行", "参与", "负责", "完成", "一定", "较强", "相关", "工作", "其他", "包括",
    "通过", "根据", "可以", "需要", "提供", "公司", "团队", "合作", "沟通", "使用",
    "a", "an", "the", "and", "or", "of", "to", "in", "for", "with", "on", "is", "are", "be",
];

/// A set of normalized words excluded from keyword counts.
#[derive(Debug, Clone, Default)]
pub struct StopWords(HashSet<String>);

impl StopWords {
    pub fn builtin() -> Self {
        Self(BUILTIN_STOP_WORDS.iter().map(|w| normalize_token(w)).collect())
    }

    /// One word per line; blank lines and `#` comments are ignored.
    pub fn parse(text: &str) -> Self {
        Self(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(normalize_token)
                .collect(),
        )
    }

    /// The built-in list extended with the words in `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| JobPulseError::io(path, e))?;
        let mut words = Self::builtin();
        let extra = Self::parse(&text);
        if extra.is_empty() {
            warn!(path = %path.display(), "stop-word file has no entries, using the built-in list");
        } else {
            debug!(path = %path.display(), count = extra.len(), "loaded stop words");
        }
        words.extend(extra);
        Ok(words)
    }

    pub fn extend(&mut self, other: StopWords) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Chinese word segmenter with token normalization and filtering.
pub struct Tokenizer {
    jieba: Jieba,
    stop_words: StopWords,
}

impl Tokenizer {
    pub fn new(stop_words: StopWords) -> Self {
        let mut jieba = Jieba::new();
        for term in TECH_TERMS {
            jieba.add_word(term, None, None);
        }
        Self { jieba, stop_words }
    }

    /// Add dictionary words so they segment as one token.
    pub fn add_words<'a>(&mut self, words: impl IntoIterator<Item = &'a str>) {
        for word in words {
            self.jieba.add_word(word, None, None);
        }
    }

    /// Load a user dictionary: the first whitespace-separated column of each
    /// non-comment line is a word (frequency and tag columns are ignored).
    pub fn load_user_dict(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| JobPulseError::io(path, e))?;
        let words: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| line.split_whitespace().next())
            .collect();
        debug!(path = %path.display(), count = words.len(), "loaded user dictionary");
        self.add_words(words);
        Ok(())
    }

    /// Segment `text` and yield normalized tokens that survive filtering.
    pub fn tokens(&self, text: &str) -> Vec<String> {
        let folded: String = text.chars().map(fold_width).collect();
        self.jieba
            .cut(&folded, true)
            .into_iter()
            .map(normalize_token)
            .filter(|token| is_meaningful(token) && !self.stop_words.contains(token))
            .collect()
    }
}

/// Lowercased, width-folded, trimmed.
pub fn normalize_token(token: &str) -> String {
    token
        .chars()
        .map(fold_width)
        .collect::<String>()
        .trim()
        .to_lowercase()
}

fn is_meaningful(token: &str) -> bool {
    let mut chars = token.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !token.chars().any(char::is_alphanumeric) {
        return false;
    }
    if token
        .chars()
        .all(|c| c.is_numeric() || matches!(c, '.' | '%' | ',' | '-' | '+'))
    {
        return false;
    }
    if chars.next().is_none() && !is_cjk(first) {
        return false;
    }
    true
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}' | '\u{F900}'..='\u{FAFF}')
}

/// Sort by count descending, then keyword ascending, and keep the first `top`.
pub fn rank(counts: HashMap<String, u64>, top: usize) -> Vec<KeywordCount> {
    let mut ranked: Vec<KeywordCount> = counts
        .into_iter()
        .map(|(keyword, count)| KeywordCount { keyword, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.keyword.cmp(&b.keyword)));
    ranked.truncate(top);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_noise_tokens() {
        assert!(is_meaningful("rust"));
        assert!(is_meaningful("数"));
        assert!(!is_meaningful("x"));
        assert!(!is_meaningful("，"));
        assert!(!is_meaningful("2024"));
        assert!(!is_meaningful("3.5%"));
        assert!(!is_meaningful(" "));
    }

    #[test]
    fn segments_and_normalizes() {
        let tokenizer = Tokenizer::new(StopWords::builtin());
        let tokens = tokenizer.tokens("熟悉ＰｙＴｏｒｃｈ和机器学习，负责3个项目");
        assert!(tokens.contains(&"pytorch".to_string()));
        assert!(tokens.contains(&"机器学习".to_string()));
        assert!(!tokens.contains(&"和".to_string()));
        assert!(!tokens.contains(&"熟悉".to_string()));
        assert!(!tokens.iter().any(|t| t == "3" || t == "，" || t == ","));
    }

    #[test]
    fn stop_word_file_format() {
        let words = StopWords::parse("# comment\n岗位\n\n  Docker  \n");
        assert_eq!(words.len(), 2);
        assert!(words.contains("岗位"));
        assert!(words.contains("docker"));
        assert!(StopWords::parse("# nothing here\n\n").is_empty());
    }

    #[test]
    fn user_words_stay_whole() {
        let mut tokenizer = Tokenizer::new(StopWords::default());
        tokenizer.add_words(["星河存储引擎"]);
        let tokens = tokenizer.tokens("参与星河存储引擎研发");
        assert!(tokens.contains(&"星河存储引擎".to_string()));
    }

    #[test]
    fn ranking_breaks_ties_alphabetically() {
        let counts = HashMap::from([
            ("rust".to_string(), 3),
            ("go".to_string(), 3),
            ("java".to_string(), 5),
            ("c++".to_string(), 1),
        ]);
        let ranked = rank(counts, 3);
        let names: Vec<_> = ranked.iter().map(|k| k.keyword.as_str()).collect();
        assert_eq!(names, vec!["java", "go", "rust"]);
    }
}
