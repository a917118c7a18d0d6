
use pinyin::ToPinyin;
use std::cmp::Ordering;
use std::fmt;

/// Letter used for CJK ideographs that have no known pinyin reading.
pub const UNMAPPED_CJK: char = 'Z';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bucket(char);

const ORDER: [Bucket; 37] = [
    Bucket('0'), Bucket('1'), Bucket('2'), Bucket('3'), Bucket('4'),
    Bucket('5'), Bucket('6'), Bucket('7'), Bucket('8'), Bucket('9'),
    Bucket('A'), Bucket('B'), Bucket('C'), Bucket('D'), Bucket('E'),
    Bucket('F'), Bucket('G'), Bucket('H'), Bucket('I'), Bucket('J'),
    Bucket('K'), Bucket('L'), Bucket('M'), Bucket('N'), Bucket('O'),
    Bucket('P'), Bucket('Q'), Bucket('R'), Bucket('S'), Bucket('T'),
    Bucket('U'), Bucket('V'), Bucket('W'), Bucket('X'), Bucket('Y'),
    Bucket('Z'),
    Bucket('#'),
];

impl Bucket {
    pub const OTHER: Bucket = Bucket('#');

    pub fn label(self) -> char {
        self.0
    }

    /// Position in [`bucket_order`]; `#` is always last.
    pub fn rank(self) -> usize {
        match self.0 {
            d @ '0'..='9' => d as usize - '0' as usize,
            l @ 'A'..='Z' => 10 + (l as usize - 'A' as usize),
            _ => ORDER.len() - 1,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Digits, then A-Z, then `#`.
pub fn bucket_order() -> &'static [Bucket] {
    &ORDER
}

pub fn classify(title: &str) -> Bucket {
    let Some(ch) = significant_chars(title).next() else {
        return Bucket::OTHER;
    };
    if ch.is_ascii_digit() {
        return Bucket(ch);
    }
    if ch.is_ascii_alphabetic() {
        return Bucket(ch.to_ascii_uppercase());
    }
    if is_cjk(ch) {
        return match pinyin_initial(ch) {
            Some(letter) => Bucket(letter),
            None => Bucket(UNMAPPED_CJK),
        };
    }
    Bucket::OTHER
}

pub fn compare(a: &str, b: &str) -> Ordering {
    classify(a)
        .rank()
        .cmp(&classify(b).rank())
        .then_with(|| natural_cmp(&cleaned(a), &cleaned(b)))
        .then_with(|| a.cmp(b))
}

pub fn sort_titles(titles: &mut [String]) {
    titles.sort_by(|a, b| compare(a, b));
}

/// Non-empty sections in bucket order, each sorted with [`compare`].
pub fn group<I, S>(titles: I) -> Vec<(Bucket, Vec<String>)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let order = bucket_order();
    let mut sections: Vec<Vec<String>> = vec![Vec::new(); order.len()];
    for title in titles {
        let title = title.into();
        sections[classify(&title).rank()].push(title);
    }
    order
        .iter()
        .zip(sections)
        .filter(|(_, items)| !items.is_empty())
        .map(|(bucket, mut items)| {
            sort_titles(&mut items);
            (*bucket, items)
        })
        .collect()
}

/// Natural comparison: digit runs compare as integers, text runs by collation key.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = runs(a);
    let right = runs(b);
    for (x, y) in left.iter().zip(right.iter()) {
        let ord = match (x, y) {
            (Run::Num(x), Run::Num(y)) => numeric_cmp(x, y),
            (Run::Num(_), Run::Text(_)) => Ordering::Less,
            (Run::Text(_), Run::Num(_)) => Ordering::Greater,
            (Run::Text(x), Run::Text(y)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

#[derive(Debug)]
enum Run {
    Num(String),
    Text(String),
}

fn runs(s: &str) -> Vec<Run> {
    let mut out = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&first) = chars.peek() {
        let digits = first.is_ascii_digit();
        let mut run = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() != digits {
                break;
            }
            run.push(c);
            chars.next();
        }
        out.push(if digits { Run::Num(run) } else { Run::Text(collation_key(&run)) });
    }
    out
}

fn numeric_cmp(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn collation_key(text: &str) -> String {
    let mut key = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch.to_pinyin() {
            Some(py) if is_cjk(ch) => key.push_str(py.plain()),
            _ => key.extend(ch.to_lowercase()),
        }
    }
    key
}

fn cleaned(title: &str) -> String {
    significant_chars(title).collect()
}

fn significant_chars(title: &str) -> impl Iterator<Item = char> + '_ {
    title.chars().skip_while(|c| is_leading_noise(*c)).map(fold_fullwidth)
}

fn pinyin_initial(ch: char) -> Option<char> {
    let py = ch.to_pinyin()?;
    py.plain()
        .chars()
        .next()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
}

fn is_leading_noise(c: char) -> bool {
    c.is_whitespace()
        || c.is_ascii_punctuation()
        || matches!(c,
            '\u{2000}'..='\u{206F}'
            | '\u{3000}'..='\u{303F}'
            | '\u{FE30}'..='\u{FE4F}'
            | '\u{FF01}'..='\u{FF0F}'
            | '\u{FF1A}'..='\u{FF20}'
            | '\u{FF3B}'..='\u{FF40}'
            | '\u{FF5B}'..='\u{FF65}')
}

fn fold_fullwidth(c: char) -> char {
    match c {
        '\u{FF10}'..='\u{FF19}' | '\u{FF21}'..='\u{FF3A}' | '\u{FF41}'..='\u{FF5A}' => {
            char::from_u32(c as u32 - 0xFEE0).unwrap_or(c)
        }
        _ => c,
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(groups: &[(Bucket, Vec<String>)]) -> Vec<char> {
        groups.iter().map(|(b, _)| b.label()).collect()
    }

    #[test]
    fn classifies_digits_letters_and_cjk() {
        assert_eq!(classify("1月之海").label(), '1');
        assert_eq!(classify("Apple诲").label(), 'A');
        assert_eq!(classify("zoo").label(), 'Z');
        assert_eq!(classify("海贼王").label(), 'H');
        assert_eq!(classify("进击的巨人").label(), 'J');
    }

    #[test]
    fn skips_leading_brackets_and_punctuation() {
        assert_eq!(classify("【完结】火影忍者").label(), 'W');
        assert_eq!(classify("[Scan] Berserk").label(), 'S');
        assert_eq!(classify("  《龙珠》").label(), 'L');
        assert_eq!(classify("(1) test").label(), '1');
    }

    #[test]
    fn folds_fullwidth_ascii() {
        assert_eq!(classify("ＯＮＥ").label(), 'O');
        assert_eq!(classify("７号").label(), '7');
    }

    #[test]
    fn empty_and_symbol_titles_go_last() {
        assert_eq!(classify(""), Bucket::OTHER);
        assert_eq!(classify("!!!"), Bucket::OTHER);
        assert_eq!(classify("【】"), Bucket::OTHER);
        assert_eq!(classify("é"), Bucket::OTHER);
        assert_eq!(classify("ありがとう"), Bucket::OTHER);
    }

    #[test]
    fn every_title_lands_in_the_fixed_set() {
        let samples = ["", "a", "Z9", "0", "中", "★", "ｑ", "《》x", "𠀀", "\u{3400}"];
        for s in samples {
            let b = classify(s);
            assert!(bucket_order().contains(&b), "{s:?} -> {b}");
        }
    }

    #[test]
    fn order_is_digits_letters_hash() {
        let order = bucket_order();
        assert_eq!(order.len(), 37);
        assert_eq!(order[0].label(), '0');
        assert_eq!(order[10].label(), 'A');
        assert_eq!(order[36], Bucket::OTHER);
        for (i, b) in order.iter().enumerate() {
            assert_eq!(b.rank(), i);
        }
    }

    #[test]
    fn numeric_runs_compare_as_integers() {
        assert_eq!(compare("Episode 2", "Episode 10"), Ordering::Less);
        assert_eq!(natural_cmp("a9b", "a10b"), Ordering::Less);
        assert_eq!(natural_cmp("v1.2", "v1.10"), Ordering::Less);
        assert_eq!(natural_cmp("99999999999999999999", "100000000000000000000"), Ordering::Less);
        assert_eq!(natural_cmp("ab", "abc"), Ordering::Less);
    }

    #[test]
    fn bucket_rank_dominates_string_content() {
        assert_eq!(compare("Zoo", "【】"), Ordering::Less);
        assert_eq!(compare("9", "Aardvark"), Ordering::Less);
        assert_eq!(compare("安静", "Beta"), Ordering::Less);
    }

    #[test]
    fn compare_is_a_total_order() {
        let titles = [
            "Episode 10", "Episode 2", "episode 2", "海贼王", "航海", "Apple诲", "1月之海",
            "10月", "2月", "!", "", "Zoo", "zoo", "a1", "ab", "a01", "【完结】火影",
        ];
        for a in titles {
            assert_eq!(compare(a, a), Ordering::Equal);
            for b in titles {
                assert_eq!(compare(a, b), compare(b, a).reverse(), "{a:?} vs {b:?}");
                for c in titles {
                    if compare(a, b) == Ordering::Less && compare(b, c) == Ordering::Less {
                        assert_eq!(compare(a, c), Ordering::Less, "{a:?} < {b:?} < {c:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn groups_follow_bucket_order() {
        let groups = group(["Zoo", "Apple诲", "1月之海"]);
        assert_eq!(labels(&groups), vec!['1', 'A', 'Z']);
        assert_eq!(groups[0].1, vec!["1月之海".to_string()]);
        assert_eq!(groups[1].1, vec!["Apple诲".to_string()]);
        assert_eq!(groups[2].1, vec!["Zoo".to_string()]);
    }

    #[test]
    fn sections_are_sorted_naturally() {
        let groups = group(["Vol 10", "Vol 2", "vol 1", "???"]);
        assert_eq!(labels(&groups), vec!['V', '#']);
        assert_eq!(groups[0].1, vec!["vol 1", "Vol 2", "Vol 10"]);
    }
}
