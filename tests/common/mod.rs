#![allow(dead_code)]

use xformshift::{Decisions, EngineConfig};

pub const SURVEY: &str = include_str!("../fixtures/survey.xml");
pub const SURVEY2: &str = include_str!("../fixtures/survey2.xml");
pub const SURVEY_ANSWER: &str = include_str!("../fixtures/survey_answer.xml");
pub const SURVEY2_ANSWER: &str = include_str!("../fixtures/survey2_answer.xml");

pub fn survey_decisions() -> Decisions {
    Decisions::from_pairs([
        ("determine_first_name", "name"),
        ("determine_birthday", "__new_field__"),
        ("determine_last_name", "__new_field__"),
        ("prepopulate_last_name", "Fowler"),
    ])
    .unwrap()
}

pub fn config() -> EngineConfig {
    EngineConfig::default()
}

/// Minimal form `root` whose instance body is `instance`
pub fn form(root: &str, title: &str, instance: &str) -> String {
    format!(
        r#"<h:html xmlns="http://www.w3.org/2002/xforms" xmlns:h="http://www.w3.org/1999/xhtml">
  <h:head>
    <h:title>{title}</h:title>
    <model>
      <instance><{root} id="{root}">{instance}<meta><instanceID/></meta></{root}></instance>
    </model>
  </h:head>
  <h:body/>
</h:html>"#
    )
}

/// Answer to a form built with [`form`]
pub fn answer(root: &str, uuid: &str, body: &str) -> String {
    format!(r#"<{root}>{body}<meta><instanceID>uuid:{uuid}</instanceID></meta></{root}>"#)
}
