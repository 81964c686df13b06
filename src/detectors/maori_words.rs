//! Watch-list of Māori words that are only correctly spelled with macrons, and the
//! detector that flags their unmacroned forms in added text.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use super::{Detector, DEFAULT_ALERT_PAGE};
use crate::macrons::strip_macrons;
use crate::model::{ChangeEvent, DiffContext, SuspiciousRev};

/// Built-in watch-list (place names, iwi and common words).
pub const WORDS: &[&str] = &[
    "Ahikōuka", "Atatū", "Auahitūroa", "Eketāhuna", "Hinehōaka", "Hinenuitepō",
    "Hinepūkohurangi", "Hāhau", "Hāhi", "Hākuturi", "Hāmama", "Hāngi", "Hāpu", "Hāpua",
    "Hāpuku", "Hāwea", "Hāwera", "Hūhana", "Hūkerenui", "Kahikatea", "Kaikōrero", "Kaikōura",
    "Kawhātau", "Kaūmatua", "Kererū", "Kumeū", "Kākā", "Kākāpō", "Kākāriki", "Kāpiti",
    "Kāti Māmoe", "Kāwharu", "Kōpuaranga", "Kōpuru", "Kōrero", "Kōtuku", "Kūaotunu",
    "Manawatāwhi", "Manawatū", "Mangarākau", "Mangatāwhai", "Mangatāwhiri", "Mangōnui",
    "Matatā", "Motumānawa", "Māhia", "Māhina", "Mākara", "Mākareao", "Mākutu", "Māngai",
    "Māngere", "Māori", "Māpua", "Mārahau", "Mārire", "Māriri", "Mārua", "Mātaikōtare",
    "Mōkau", "Mōrere", "Mōtū", "Ngongotahā", "Ngā Atua", "Ngāhape", "Ngāhinapōuri", "Ngāi",
    "Ngākau", "Ngāpuhi", "Ngāruawāhia", "Ngāti", "Ngātīmoti", "Nūhaka", "Otūmoetai", "Owhiro",
    "Paekākāriki", "Pangatōtara", "Papakōwhai", "Papatūānuku", "Puramāhoi", "Putāruru",
    "Pāhaoa", "Pāho", "Pākawau", "Pākehā", "Pākuratahi", "Pārae Karetu", "Pāremoremo", "Pāua",
    "Pāuatahanui", "Pōhara", "Pōhue", "Pōkeno", "Pōrangahau", "Pūerua", "Pūhaorangi", "Pūkio",
    "Pūkorokoro", "Pūponga", "Pūrākaunui", "Rangitūmau", "Rotokākahi", "Ruakākā",
    "Ruakōkoputuna", "Rākau", "Rāngaiika", "Rānui", "Rāpaki", "Rāpaki-o-Te", "Rātana",
    "Rātapu", "Rāwiri", "Rūnanga", "Taitā", "Takapūwāhia", "Takatāpui", "Taupō",
    "Te Pāti Māori", "Tongapōrutu", "Tungāne", "Tā_moko", "Tāhunanui", "Tākaka", "Tākapu",
    "Tākitimu", "Tākou", "Tāmaki", "Tāmati", "Tāme Iti", "Tāne", "Tāneatua", "Tānemahuta",
    "Tāngarākau", "Tāniko", "Tātou", "Tāwhaki", "Tāwharanui", "Tāwhiao", "Tāwhirimātea",
    "Tīnui", "Tīrau", "Tīraumea", "Tītahi", "Tōrere", "Tōtara", "Tōtaranui", "Tūhauwiri",
    "Tūmatauenga", "Tūranga", "Tūrangi", "Tūtewehiwehi", "Tūwharetoa", "Tūāwhiorangi", "Tūī",
    "Umukurī", "Waihāhā", "Waimā", "Waimārama", "Waipātiki", "Wairau", "Wairoa", "Waitematā",
    "Waitākere", "Waitārere", "Waitōtara", "Whaikōrero", "Whakamārama", "Whakatāne",
    "Whakatīwai", "Whangamatā", "Whangamōmona", "Whangaparāoa", "Whangapē", "Whangākea",
    "Whangārei", "Wharekōpae", "Wharepūhunga", "Whānau", "Whāngaimoana", "Wāka", "Wānaka",
    "Wānanga", "Wētā", "aihikirīmi", "anā", "hapū", "hākari", "hāngi", "hēki", "hīkoi",
    "hōhonu", "hōhā", "hōiho", "hū", "kaikōrero", "kakī", "kamupūtu", "kaputī", "kaumātua",
    "kirīmi", "konā", "korā", "kurī", "kā", "kāinga", "kākahu", "kākāriki", "kānga", "kāo",
    "kāore", "kāpata", "kāreti", "kāti", "kēmu", "kī", "kīhini", "kōhanga", "kōpū", "kōrero",
    "kōrua", "kōtiro", "kōwhai", "kūaha", "motokā", "motukā", "māhanga", "māharahara",
    "māhunga", "mānia", "māripi", "mātakitaki", "mātua", "māua", "māui", "māwhero", "mīere",
    "mīharo", "mīti", "mōhio", "mōhiti", "mōkai", "mōrena", "mōwhiti", "ngāi", "parāoa", "pā",
    "pākete", "pānui", "pāpā", "pātai", "pātītī", "pēpi", "pīnati", "pīrangi", "pōtae",
    "pōuri", "pūtu", "rākau", "rāpeti", "rīwai", "rōpū", "rūma", "tamāhine", "terēina",
    "tuarā", "tungāne", "tuāhine", "tākaro", "tāna", "tāne", "tāngata", "tāone", "tātahi",
    "tātou", "tēina", "tēnei", "tēnā", "tēpu", "tērā", "tīma", "tīmata", "tīpuna", "tōhi",
    "tōkena", "tōku", "tū", "tūpuna", "tūrangawaewae", "tūru", "tūtae", "whaikōrero", "whetū",
    "whā", "whānau", "whāngai", "wāhine", "Ākau", "Ākitio", "Ākura", "Āpirana", "Āpiti",
    "Ārohirohi", "Ātiamuri", "Āwhitu", "ākonga", "āku", "āna", "āporo", "āpōpō", "ārai", "āta",
    "ātaahua", "āwhina", "ēnei", "Ōakura", "Ōhaeawai", "Ōhau", "Ōhaupō", "Ōhingaiti", "Ōhiwa",
    "Ōhope", "Ōhura", "Ōkaihau", "Ōkato", "Ōkiwi Bay", "Ōkura", "Ōkārito", "Ōmiha", "Ōmokoroa",
    "Ōmāpere", "Ōnoke", "Ōpaheke", "Ōpaki", "Ōpou", "Ōpunake", "Ōpārara", "Ōpārau", "Ōpōtiki",
    "Ōraka", "Ōrere", "Ōrākei", "Ōtaki", "Ōtara", "Ōtaua", "Ōtautahi", "Ōtāhuhu", "Ōtāne",
    "Ōwhango", "Ōwhata", "Ōwhiro",
];

const MAX_ALTERNATIVES: usize = 1024;
const MAX_FORM_CHARS: usize = 64;
const REGEX_SIZE_LIMIT: usize = 1 << 22;

// Anything that is not part of a word bounds a token: whitespace, punctuation,
// wiki markup (`==`, `*`, `#`, `|`, brackets) and quotes. Combining marks stay inside.
const DELIMITERS: &str = r"[^\p{L}\p{N}\p{M}]";

static BUILTIN: Lazy<Arc<WordMatcher>> = Lazy::new(|| {
    Arc::new(WordMatcher::build(WORDS.iter().copied()).expect("built-in watch-list compiles"))
});

/// Compiled matcher for the unmacroned, lowercase forms of a watch-list.
///
/// Built once; matching is linear in the input (the `regex` crate never backtracks).
#[derive(Debug)]
pub struct WordMatcher {
    re: Regex,
    forms: BTreeSet<String>,
}

impl WordMatcher {
    /// The matcher for [`WORDS`], compiled on first use.
    pub fn builtin() -> Arc<WordMatcher> {
        Arc::clone(&BUILTIN)
    }

    /// Compile a matcher. Entries without any macron are skipped: their stripped form is
    /// the correct spelling. Underscores are read as spaces.
    pub fn build<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut forms = BTreeSet::new();
        for word in words {
            let word = word
                .as_ref()
                .replace('_', " ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();
            let form = strip_macrons(&word);
            if word.is_empty() || form == word {
                continue;
            }
            if form.chars().count() > MAX_FORM_CHARS {
                bail!("watch-list entry too long: {word}");
            }
            forms.insert(form);
        }
        if forms.is_empty() {
            bail!("watch-list has no macroned entries");
        }
        if forms.len() > MAX_ALTERNATIVES {
            bail!(
                "watch-list too large: {} entries (max {MAX_ALTERNATIVES})",
                forms.len()
            );
        }

        // Longest first, so "kati mamoe" wins over "kati".
        let mut ordered: Vec<&String> = forms.iter().collect();
        ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = ordered
            .iter()
            .map(|f| regex::escape(f))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!("(?:^|{DELIMITERS})({alternation})(?:{DELIMITERS}|$)");

        let re = RegexBuilder::new(&pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .context("compiling watch-list matcher")?;
        Ok(Self { re, forms })
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    pub fn contains_form(&self, form: &str) -> bool {
        self.forms.contains(form)
    }

    /// Delimited watch-list forms in `text`, in order of appearance. `text` is matched as
    /// given; callers fold case and strip templates first.
    pub fn find_all(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let Some(m) = self.re.captures_at(text, start).and_then(|c| c.get(1)) else {
                break;
            };
            out.push(m.as_str().to_string());
            // the trailing delimiter may open the next token
            start = m.end();
        }
        out
    }
}

/// Blank out `{{ … }}` template spans (nested ones included). An unmatched `}}` means
/// the hunk began inside a template, so everything before it is dropped; an unclosed
/// `{{` drops the rest of the hunk.
pub fn strip_templates(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                depth += 1;
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                if depth > 0 {
                    depth -= 1;
                } else {
                    out.clear();
                }
                if depth == 0 {
                    out.push(' ');
                }
            }
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Flags added text containing watch-list words spelled without their macrons.
pub struct MaoriWordDetector {
    alert_page: String,
    matcher: Arc<WordMatcher>,
}

impl Default for MaoriWordDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_PAGE)
    }
}

impl MaoriWordDetector {
    pub fn new(alert_page: impl Into<String>) -> Self {
        Self::with_matcher(alert_page, WordMatcher::builtin())
    }

    pub fn with_matcher(alert_page: impl Into<String>, matcher: Arc<WordMatcher>) -> Self {
        Self {
            alert_page: alert_page.into(),
            matcher,
        }
    }

    /// Distinct misspelled forms across all added hunks, sorted.
    pub fn misspellings(&self, diff: &DiffContext) -> BTreeSet<String> {
        diff.added_context
            .iter()
            .flat_map(|hunk| self.matcher.find_all(&strip_templates(&hunk.to_lowercase())))
            .collect()
    }
}

impl Detector for MaoriWordDetector {
    fn id(&self) -> &'static str {
        "maori-words"
    }

    fn detect(&self, change: &ChangeEvent, diff: &DiffContext) -> Option<SuspiciousRev> {
        let found = self.misspellings(diff);
        if found.is_empty() {
            return None;
        }
        let list = found.into_iter().collect::<Vec<_>>().join(", ");
        Some(SuspiciousRev::for_change(
            &self.alert_page,
            change,
            format!("possible Māori word(s) missing macrons: '''{list}'''"),
        ))
    }
}
