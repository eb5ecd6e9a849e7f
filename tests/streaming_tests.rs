mod common;

use std::sync::Arc;

use common::{
    echo_engine, hello_conversation, scripted_engine, FailingSink, ScriptedSource,
};
use serde_json::json;
use sgl_token_streamer::{
    config::GenerationConfig,
    protocols::generate::GenerateRequest,
    sink::{CollectingSink, SinkMessage},
    token_source::TokenEvent,
    tokenizer::mock::EOS_ID,
    StreamError, StreamingEngine,
};

fn fragments(messages: &[SinkMessage]) -> Vec<&str> {
    messages
        .iter()
        .filter_map(|m| match m {
            SinkMessage::Fragment(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn terminal_count(messages: &[SinkMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, SinkMessage::Final | SinkMessage::Error(_)))
        .count()
}

#[cfg(test)]
mod scenario_tests {
    use super::*;

    #[tokio::test]
    async fn test_sky_is_blue() {
        let source = Arc::new(ScriptedSource::tokens(&[101, 102, 103, 104, EOS_ID]));
        let engine = scripted_engine(Arc::clone(&source));
        let mut sink = CollectingSink::new();

        let summary = engine
            .run(&GenerateRequest::new(hello_conversation()), &mut sink)
            .await
            .unwrap();

        assert_eq!(
            sink.messages(),
            &[
                SinkMessage::Fragment("The".to_string()),
                SinkMessage::Fragment(" sky".to_string()),
                SinkMessage::Fragment(" is".to_string()),
                SinkMessage::Fragment(" blue.".to_string()),
                SinkMessage::Final,
            ]
        );
        assert!(summary.saw_eos);
        // End-of-sequence is not a generated token
        assert_eq!(summary.tokens, 4);
        assert_eq!(summary.fragments, 4);
    }

    #[tokio::test]
    async fn test_first_fragment_loses_leading_space() {
        // Echo replays "▁Hi" after the "[INST] Hi [/INST]" prompt: first delta is " Hi"
        let engine = echo_engine();
        let mut sink = CollectingSink::new();
        let request = GenerateRequest::new(json!([{"role": "user", "content": "Hi"}]));

        engine.run(&request, &mut sink).await.unwrap();
        assert_eq!(
            sink.messages(),
            &[SinkMessage::Fragment("Hi".to_string()), SinkMessage::Final]
        );
    }

    #[tokio::test]
    async fn test_invalid_conversation_gets_single_error() {
        let source = Arc::new(ScriptedSource::tokens(&[101, EOS_ID]));
        let engine = scripted_engine(Arc::clone(&source));
        let mut sink = CollectingSink::new();
        let request = GenerateRequest::new(json!(r#"[{"role":"user"}]"#));

        let err = engine.run(&request, &mut sink).await.unwrap_err();
        assert!(matches!(err, StreamError::InvalidInput { index: Some(0), .. }));
        assert!(fragments(sink.messages()).is_empty());
        assert_eq!(sink.messages().len(), 1);
        assert!(sink.error().is_some());
        // Nothing was generated
        assert!(source.opened().is_empty());
    }
}

#[cfg(test)]
mod termination_tests {
    use super::*;

    #[tokio::test]
    async fn test_exhaustion_without_eos_flushes_and_finalizes() {
        let source = Arc::new(ScriptedSource::tokens(&[101, 105, 105]));
        let engine = scripted_engine(source);
        let mut sink = CollectingSink::new();

        let summary = engine
            .run(&GenerateRequest::new(hello_conversation()), &mut sink)
            .await
            .unwrap();

        assert_eq!(fragments(sink.messages()), vec!["The", "  "]);
        assert_eq!(sink.messages().last(), Some(&SinkMessage::Final));
        assert_eq!(terminal_count(sink.messages()), 1);
        assert!(!summary.saw_eos);
        assert_eq!(summary.tokens, 3);
    }

    #[tokio::test]
    async fn test_immediate_eos_still_finalizes() {
        let engine = scripted_engine(Arc::new(ScriptedSource::tokens(&[EOS_ID, 101])));
        let mut sink = CollectingSink::new();

        engine
            .run(&GenerateRequest::new(hello_conversation()), &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.messages(), &[SinkMessage::Final]);
    }

    #[tokio::test]
    async fn test_newline_fragment_carries_pending_whitespace() {
        let engine = scripted_engine(Arc::new(ScriptedSource::tokens(&[
            101, 105, 106, 102, EOS_ID,
        ])));
        let mut sink = CollectingSink::new();

        engine
            .run(&GenerateRequest::new(hello_conversation()), &mut sink)
            .await
            .unwrap();
        assert_eq!(fragments(sink.messages()), vec!["The", " \n", " sky"]);
    }

    #[tokio::test]
    async fn test_generation_error_mid_stream() {
        let engine = scripted_engine(Arc::new(ScriptedSource::events(vec![
            TokenEvent::Token(101),
            TokenEvent::Token(105),
            TokenEvent::Error("backend went away".to_string()),
            TokenEvent::Token(102),
        ])));
        let mut sink = CollectingSink::new();

        let err = engine
            .run(&GenerateRequest::new(hello_conversation()), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::Generation(ref m) if m == "backend went away"));
        // Already-sent text stays; buffered whitespace is not flushed on failure
        assert_eq!(fragments(sink.messages()), vec!["The"]);
        assert!(!sink.messages().contains(&SinkMessage::Final));
        assert_eq!(terminal_count(sink.messages()), 1);
    }

    #[tokio::test]
    async fn test_open_failure_is_single_error() {
        let engine = scripted_engine(Arc::new(ScriptedSource::failing_open("connection refused")));
        let mut sink = CollectingSink::new();

        let err = engine
            .run(&GenerateRequest::new(hello_conversation()), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Generation(_)));
        assert_eq!(sink.messages().len(), 1);
        assert!(sink.error().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_sink_failure_aborts_with_one_error_attempt() {
        let engine = scripted_engine(Arc::new(ScriptedSource::tokens(&[
            101, 102, 103, 104, EOS_ID,
        ])));
        let mut sink = FailingSink::new(2);

        let err = engine
            .run(&GenerateRequest::new(hello_conversation()), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::Emission(_)));
        assert_eq!(sink.messages, vec![SinkMessage::Fragment("The".to_string())]);
        assert_eq!(sink.error_attempts, 1);
    }
}

#[cfg(test)]
mod setup_tests {
    use super::*;

    #[tokio::test]
    async fn test_max_tokens_reaches_source() {
        let source = Arc::new(ScriptedSource::tokens(&[EOS_ID]));
        let engine = scripted_engine(Arc::clone(&source));

        let request = GenerateRequest {
            conversation: hello_conversation(),
            max_tokens: Some(json!("7")),
        };
        engine.run(&request, &mut CollectingSink::new()).await.unwrap();
        engine
            .run(&GenerateRequest::new(hello_conversation()), &mut CollectingSink::new())
            .await
            .unwrap();

        let opened = source.opened();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[0].1, 7);
        assert_eq!(opened[1].1, 512);
        // "Hello! " is a single piece, preceded by BOS
        assert_eq!(opened[0].0, vec![1, 100]);
    }

    #[tokio::test]
    async fn test_zero_max_tokens_is_invalid() {
        let engine = scripted_engine(Arc::new(ScriptedSource::tokens(&[EOS_ID])));
        let request = GenerateRequest::new(hello_conversation()).with_max_tokens(0);
        let err = engine
            .run(&request, &mut CollectingSink::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_template_exception_is_templating_error() {
        let engine = scripted_engine(Arc::new(ScriptedSource::tokens(&[EOS_ID])))
            .with_chat_template("{{ raise_exception('roles must alternate') }}");
        let mut sink = CollectingSink::new();

        let err = engine
            .run(&GenerateRequest::new(hello_conversation()), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Templating(ref m) if m.contains("roles must alternate")));
        assert_eq!(sink.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_unencodable_prompt_is_tokenization_error() {
        let engine = scripted_engine(Arc::new(ScriptedSource::tokens(&[EOS_ID])));
        let request = GenerateRequest::new(json!([{"role": "user", "content": "¿qué?"}]));

        let err = engine
            .run(&request, &mut CollectingSink::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Tokenization(_)));
    }

    #[tokio::test]
    async fn test_default_template_does_not_double_bos() {
        let engine = echo_engine();
        let prepared = engine
            .prepare(&GenerateRequest::new(json!([{"role": "user", "content": "Hi"}])))
            .unwrap();
        assert_eq!(prepared.prompt, "<s>[INST] Hi [/INST]");
        assert_eq!(prepared.prompt_ids, vec![1, 3, 19, 4]);
    }
}

#[cfg(test)]
mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_requests_are_independent() {
        let engine = Arc::new(echo_engine());
        let prompts = ["Hello world", "The sky is blue", "How are you ?", "Hi"];

        let handles: Vec<_> = prompts
            .iter()
            .map(|prompt| {
                let engine = Arc::clone(&engine);
                let request =
                    GenerateRequest::new(json!([{"role": "user", "content": prompt}]));
                tokio::spawn(async move {
                    let mut sink = CollectingSink::new();
                    engine.run(&request, &mut sink).await.unwrap();
                    sink.text()
                })
            })
            .collect();

        let mut outputs = Vec::new();
        for handle in handles {
            outputs.push(handle.await.unwrap());
        }
        assert_eq!(
            outputs,
            vec!["Hello world", "The sky is blue", "How are you?", "Hi"]
        );
    }

    #[tokio::test]
    async fn test_strip_can_be_disabled() {
        let tokenizer = common::mistral_tokenizer();
        let source = sgl_token_streamer::token_source::LocalTokenSource::new(
            Arc::new(sgl_token_streamer::token_source::EchoGenerator::new(
                tokenizer.clone(),
            )),
            4,
            std::time::Duration::from_secs(30),
        );
        let engine = StreamingEngine::new(
            tokenizer,
            Arc::new(source),
            GenerationConfig {
                strip_first_leading_space: false,
                ..Default::default()
            },
        );
        let mut sink = CollectingSink::new();
        engine
            .run(
                &GenerateRequest::new(json!([{"role": "user", "content": "Hi"}])),
                &mut sink,
            )
            .await
            .unwrap();
        assert_eq!(sink.text(), " Hi");
    }
}
