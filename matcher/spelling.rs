/// British spelling mapped to its American canonical form. Substring
/// replacement on lowercased text, so inflections (`organisations`) unify too.
const SPELLING_EQUIVALENTS: [(&str, &str); 18] = [
    ("organisation", "organization"),
    ("recognise", "recognize"),
    ("realise", "realize"),
    ("analyse", "analyze"),
    ("centre", "center"),
    ("colour", "color"),
    ("honour", "honor"),
    ("favour", "favor"),
    ("defence", "defense"),
    ("offence", "offense"),
    ("licence", "license"),
    ("practise", "practice"),
    ("catalogue", "catalog"),
    ("dialogue", "dialog"),
    ("programme", "program"),
    ("labour", "labor"),
    ("neighbour", "neighbor"),
    ("behaviour", "behavior"),
];

/// Maps British spelling variants onto one canonical (American) form so both
/// sides of a comparison agree regardless of which convention the student
/// learned.
#[must_use]
pub fn unify_spelling(text: &str) -> String {
    let mut unified = text.to_lowercase();
    for (british, american) in SPELLING_EQUIVALENTS {
        if unified.contains(british) {
            unified = unified.replace(british, american);
        }
    }
    unified
}
