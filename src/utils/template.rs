//! `{{key}}` placeholder rendering for configured command templates.

pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_every_occurrence() {
        let rendered = render(
            "tool save {{path}} --output {{output}} --log {{path}}.log",
            &[("path", "a.dtproj"), ("output", "bin/a.ispac")],
        );
        assert_eq!(
            rendered,
            "tool save a.dtproj --output bin/a.ispac --log a.dtproj.log"
        );
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        assert_eq!(render("run {{other}}", &[("path", "x")]), "run {{other}}");
    }
}
