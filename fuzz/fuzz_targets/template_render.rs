#![no_main]

use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use notifyhub_queue::Template;

fuzz_target!(|data: (String, String, Vec<(String, String)>)| {
    let (title_template, body_template, vars) = data;
    let tpl = Template::new("fuzz", title_template, body_template);
    let overrides: BTreeMap<String, String> = vars.into_iter().collect();

    // Rendering never panics, and every unresolved token still appears
    // literally in the output (§4.4's "left literally" contract).
    let rendered = tpl.render(&overrides);
    for token in &rendered.unresolved {
        let marker = format!("{{{{{token}}}}}");
        assert!(rendered.title.contains(&marker) || rendered.body.contains(&marker));
    }
});
