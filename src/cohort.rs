/// Static cohort tables: which registration prefix and which sections each
/// academic year carries. Injected rather than global so tests can run with
/// alternate cohorts.
#[derive(Debug, Clone)]
pub struct CohortConfig {
    entries: Vec<CohortEntry>,
}

#[derive(Debug, Clone)]
struct CohortEntry {
    year: i64,
    prefix: String,
    sections: Vec<char>,
}

impl Default for CohortConfig {
    fn default() -> Self {
        CohortConfig::new(vec![
            (1, "RA2511026050", "ABCDE"),
            (2, "RA2411026050", "ABCDE"),
            (3, "RA2311026050", "ABCD"),
        ])
    }
}

impl CohortConfig {
    pub fn new(table: Vec<(i64, &str, &str)>) -> Self {
        let entries = table
            .into_iter()
            .map(|(year, prefix, sections)| CohortEntry {
                year,
                prefix: prefix.to_string(),
                sections: sections.chars().collect(),
            })
            .collect();
        CohortConfig { entries }
    }

    fn entry(&self, year: i64) -> Option<&CohortEntry> {
        self.entries.iter().find(|e| e.year == year)
    }

    pub fn years(&self) -> Vec<i64> {
        self.entries.iter().map(|e| e.year).collect()
    }

    pub fn prefix_for_year(&self, year: i64) -> Option<&str> {
        self.entry(year).map(|e| e.prefix.as_str())
    }

    pub fn sections_for_year(&self, year: i64) -> Vec<String> {
        self.entry(year)
            .map(|e| e.sections.iter().map(|c| c.to_string()).collect())
            .unwrap_or_default()
    }

    /// Case-insensitive membership check. Unknown years have no sections.
    pub fn is_section_valid_for_year(&self, year: i64, section: &str) -> bool {
        let Some(entry) = self.entry(year) else {
            return false;
        };
        let mut chars = section.chars();
        let (Some(c), None) = (chars.next(), chars.next()) else {
            return false;
        };
        entry.sections.contains(&c.to_ascii_uppercase())
    }
}

/// Exactly three ASCII digits; no sign, no whitespace.
pub fn is_suffix_valid(suffix: &str) -> bool {
    suffix.len() == 3 && suffix.bytes().all(|b| b.is_ascii_digit())
}
