use std::path::Path;

use super::{ContextBundle, SessionKind};

/// Full session prompt: role, assembled context, task and signal contract.
pub fn render_prompt(bundle: &ContextBundle, test_file: &Path) -> String {
    let story_id = &bundle.story_id;
    let test_file = test_file.display();
    let context = bundle.render();

    match bundle.kind {
        SessionKind::TestGeneration => format!(
            r#"You are in Test Generation mode.

{context}## TASK
1. Read the acceptance criteria for story {story_id}
2. Write tests in {test_file}, at least one per acceptance criterion
3. Follow the Arrange, Act, Assert pattern
4. Do NOT implement any features

## CRITICAL RULES
- Tests MUST import and exercise the real module under test
- Tests MUST FAIL right now, because the implementation does not exist yet
- Do NOT define the functions under test inside the test file
- Mock external dependencies only, never the code under test
- A test that passes without the implementation is wrong

When complete, output exactly:
TESTS_GENERATED: {story_id}

If you cannot proceed, output:
BLOCKED: <reason>
"#
        ),
        SessionKind::Implementation => format!(
            r#"You are in Implementation mode.

{context}## TASK
1. Read the failing tests in {test_file}
2. Implement the functionality so that ALL of them pass
3. Follow every rule in the standards document
4. Do NOT modify the tests to make them pass

Run the tests in {test_file} to verify your work.

When all tests pass, output exactly:
STORY_DONE: {story_id}

If you cannot proceed, output:
BLOCKED: <reason>
"#
        ),
    }
}
