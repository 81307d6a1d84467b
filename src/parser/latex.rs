use regex::{Captures, Regex};

// PDF文本层中的公式通常是 Unicode 数学符号，这里把它们映射回 LaTeX

const SYMBOLS: &[(char, &str)] = &[
    ('∑', r"\sum"),
    ('∞', r"\infty"),
    ('→', r"\to"),
    ('±', r"\pm"),
    ('×', r"\times"),
    ('÷', r"\div"),
    ('≠', r"\neq"),
    ('≤', r"\leq"),
    ('≥', r"\geq"),
    ('√', r"\sqrt{}"),
    ('∫', r"\int"),
    ('∂', r"\partial"),
    ('∈', r"\in"),
    ('∩', r"\cap"),
    ('∪', r"\cup"),
    ('∅', r"\emptyset"),
    ('∃', r"\exists"),
    ('∀', r"\forall"),
    ('∇', r"\nabla"),
    ('≈', r"\approx"),
    ('≅', r"\cong"),
    ('≡', r"\equiv"),
    ('∝', r"\propto"),
    ('∠', r"\angle"),
    ('∴', r"\therefore"),
    ('∵', r"\because"),
    ('−', "-"),
    ('…', r"\ldots"),
    ('‒', "-"),
    ('–', "-"),
    ('—', "-"),
    ('\u{2004}', r"\quad"),
    ('\u{2009}', r"\,"),
    ('\u{00A0}', "~"),
    ('½', r"\frac{1}{2}"),
    ('⅓', r"\frac{1}{3}"),
    ('⅔', r"\frac{2}{3}"),
    ('¼', r"\frac{1}{4}"),
    ('¾', r"\frac{3}{4}"),
    ('⅛', r"\frac{1}{8}"),
    ('∏', r"\prod"),
    ('∐', r"\coprod"),
    ('∘', r"\circ"),
    ('∙', r"\cdot"),
    ('∗', r"\ast"),
    ('⋅', r"\cdot"),
    ('⋆', r"\star"),
    ('∆', r"\Delta"),
];

const GREEK: &[(char, &str)] = &[
    ('α', r"\alpha"),
    ('β', r"\beta"),
    ('γ', r"\gamma"),
    ('δ', r"\delta"),
    ('ε', r"\epsilon"),
    ('θ', r"\theta"),
    ('λ', r"\lambda"),
    ('μ', r"\mu"),
    ('π', r"\pi"),
    ('ρ', r"\rho"),
    ('σ', r"\sigma"),
    ('τ', r"\tau"),
    ('φ', r"\phi"),
    ('ω', r"\omega"),
    ('Γ', r"\Gamma"),
    ('Δ', r"\Delta"),
    ('Θ', r"\Theta"),
    ('Λ', r"\Lambda"),
    ('Π', r"\Pi"),
    ('Σ', r"\Sigma"),
    ('Φ', r"\Phi"),
    ('Ω', r"\Omega"),
];

const SUBSCRIPTS: &[(char, char)] = &[
    ('₀', '0'), ('₁', '1'), ('₂', '2'), ('₃', '3'), ('₄', '4'),
    ('₅', '5'), ('₆', '6'), ('₇', '7'), ('₈', '8'), ('₉', '9'),
    ('₊', '+'), ('₋', '-'), ('₌', '='), ('₍', '('), ('₎', ')'),
    ('ₐ', 'a'), ('ₑ', 'e'), ('ₒ', 'o'), ('ₓ', 'x'), ('ₕ', 'h'),
    ('ₖ', 'k'), ('ₗ', 'l'), ('ₘ', 'm'), ('ₙ', 'n'), ('ₚ', 'p'),
    ('ₛ', 's'), ('ₜ', 't'), ('ᵢ', 'i'), ('ᵣ', 'r'), ('ᵤ', 'u'), ('ᵥ', 'v'),
];

const SUPERSCRIPTS: &[(char, char)] = &[
    ('⁰', '0'), ('¹', '1'), ('²', '2'), ('³', '3'), ('⁴', '4'),
    ('⁵', '5'), ('⁶', '6'), ('⁷', '7'), ('⁸', '8'), ('⁹', '9'),
    ('⁺', '+'), ('⁻', '-'), ('⁼', '='), ('⁽', '('), ('⁾', ')'),
    ('ᵃ', 'a'), ('ᵇ', 'b'), ('ᶜ', 'c'), ('ᵈ', 'd'), ('ᵉ', 'e'), ('ᶠ', 'f'),
    ('ᵍ', 'g'), ('ʰ', 'h'), ('ⁱ', 'i'), ('ʲ', 'j'), ('ᵏ', 'k'), ('ˡ', 'l'),
    ('ᵐ', 'm'), ('ⁿ', 'n'), ('ᵒ', 'o'), ('ᵖ', 'p'), ('ʳ', 'r'), ('ˢ', 's'),
    ('ᵗ', 't'), ('ᵘ', 'u'), ('ᵛ', 'v'), ('ʷ', 'w'), ('ˣ', 'x'), ('ʸ', 'y'), ('ᶻ', 'z'),
];

/// Mathematical alphanumeric symbol to its plain ASCII letter or digit.
fn plain_math_char(c: char) -> Option<char> {
    let code = c as u32;
    let offset = |start: u32, base: u8| char::from(base + (code - start) as u8);
    match code {
        0x1D434..=0x1D44D => Some(offset(0x1D434, b'A')),
        0x1D44E..=0x1D467 => Some(offset(0x1D44E, b'a')),
        0x1D468..=0x1D481 => Some(offset(0x1D468, b'A')),
        0x1D482..=0x1D49B => Some(offset(0x1D482, b'a')),
        0x1D7CE..=0x1D7F5 => Some(char::from(b'0' + ((code - 0x1D7CE) % 10) as u8)),
        _ => None,
    }
}

fn lookup<'a>(table: &'a [(char, &'a str)], c: char) -> Option<&'a str> {
    table.iter().find(|(k, _)| *k == c).map(|(_, v)| *v)
}

fn script_char(table: &[(char, char)], c: char) -> char {
    table.iter().find(|(k, _)| *k == c).map(|(_, v)| *v).unwrap_or(c)
}

/// 公式检测与 Unicode -> LaTeX 转换
pub struct LatexConverter {
    detect_re: Regex,
    subscript_re: Regex,
    superscript_re: Regex,
}

impl LatexConverter {
    pub fn new() -> Self {
        Self {
            detect_re: Regex::new(concat!(
                r"\\[a-zA-Z]+",
                r"|\$[^$]+\$",
                r"|\\\(.*?\\\)|\\\[.*?\\\]",
                r"|[∑∞→±×÷≠≤≥√∫∂∈∩∪∅∃∀∇≈≅≡∝∠∴∵−…‒–—∏∐∘∙∗⋅⋆∆]",
                r"|[α-ωΑ-Ω]",
                r"|[₀-₉⁰¹²³⁴-⁹ₐₑₒₓₕₖₗₘₙₚₛₜᵢᵣᵤᵥᵃᵇᶜᵈᵉᶠᵍʰⁱʲᵏˡᵐⁿᵒᵖʳˢᵗᵘᵛʷˣʸᶻ⁺⁻⁼⁽⁾]",
                r"|[\x{2004}\x{2009}\x{00A0}]",
            ))
            .unwrap(),
            subscript_re: Regex::new(r"([A-Za-z])([₀-₉ₐₑₒₓₕₖₗₘₙₚₛₜᵤᵥ]+)").unwrap(),
            superscript_re: Regex::new(r"([A-Za-z])([⁰¹²³⁴-⁹ᵃᵇᶜᵈᵉᶠᵍʰⁱʲᵏˡᵐⁿᵒᵖʳˢᵗᵘᵛʷˣʸᶻ⁺⁻⁼⁽⁾]+)").unwrap(),
        }
    }

    pub fn detect(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        text.chars().any(|c| plain_math_char(c).is_some()) || self.detect_re.is_match(text)
    }

    /// 检测到公式时返回转换结果
    pub fn latex_for(&self, text: &str) -> Option<String> {
        self.detect(text).then(|| self.render(text))
    }

    pub fn render(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if let Some(plain) = plain_math_char(c) {
                out.push(plain);
            } else if let Some(latex) = lookup(GREEK, c).or_else(|| lookup(SYMBOLS, c)) {
                out.push_str(latex);
            } else {
                out.push(c);
            }
        }

        let out = self.subscript_re.replace_all(&out, |caps: &Captures| {
            let subs: String = caps[2].chars().map(|c| script_char(SUBSCRIPTS, c)).collect();
            format!("{{{}}}_{{{}}}", &caps[1], subs)
        });
        let out = self.superscript_re.replace_all(&out, |caps: &Captures| {
            let sups: String = caps[2].chars().map(|c| script_char(SUPERSCRIPTS, c)).collect();
            format!("{{{}}}^{{{}}}", &caps[1], sups)
        });
        out.into_owned()
    }
}
