//! Prompt construction for graph ingestion and enhancement.
//!
//! Prompts are pure functions of the task kind and the graph state. The
//! graph is embedded in its compact JSON form so the model sees exactly what
//! the caller sent.

use crate::graph::{GraphState, TaskKind};

/// Build the prompt for a task kind.
pub fn build_prompt(kind: TaskKind, graph: &GraphState) -> String {
    match kind {
        TaskKind::Pdf | TaskKind::Image => build_ingest_prompt(kind, graph),
        TaskKind::Enhancement => build_enhancement_prompt(graph),
    }
}

/// Prompt asking the model to fold an attached PDF or image into the graph.
pub fn build_ingest_prompt(kind: TaskKind, graph: &GraphState) -> String {
    let file_type = kind.label();
    format!(
        "You are an AI tasked with building an intelligent and well-structured knowledge graph for study purposes. \
The current knowledge graph contains the following information: {graph}. \
Your task is to expand and refine this graph by analyzing the newly provided {file_type}. \
Please ensure the following while updating the graph:\n\
1. Break down the content into well-defined nodes (concepts) and edges (relationships between concepts).\n\
2. Make sure each node is associated with relevant subtopics, key points, and summaries.\n\
3. For any academic content, include references to important sections, diagrams, or formulas that enhance understanding.\n\
4. Ensure the graph is organized logically, so each node flows into the next in a manner that promotes a clear learning pathway.\n\
5. Capture key insights, examples, and practical applications wherever applicable.\n\
6. If the file is an image, detect and describe the main elements, charts, or text visible in the image, and integrate them into the graph meaningfully.\n\
7. If the file is a PDF, parse the document and extract essential sections, topics, and summaries to form nodes, linked with related topics in the graph.\n\
8. Ensure all nodes and edges are clearly labeled to maintain clarity in the study graph structure.\n\
9. Do not include any newline characters in the final response.\n\
Return only the updated knowledge graph as a raw JSON document, with no additional commentary.",
        graph = graph.to_json_string(),
        file_type = file_type,
    )
}

/// Prompt asking the model to refine the graph without any attached file.
pub fn build_enhancement_prompt(graph: &GraphState) -> String {
    format!(
        "You are an AI assistant tasked with automatically enhancing a knowledge graph for study purposes. \
The current knowledge graph contains the following information: {graph}. \
Your task is to intelligently refine and optimize this graph structure by:\n\
1. Identifying any gaps or missing concepts that could enhance the understanding of the subject.\n\
2. Returning the updated JSON structure of the knowledge graph in the exact same JSON format as the existing graph.\n\
3. Returning the response in the exact same JSON format as the existing graph without any extra fields or information.\n\
4. Using proper JSON with double-quoted keys and values, never single quotes.\n\
Return only the raw JSON document, with no additional commentary.",
        graph = graph.to_json_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::parse_graph_state;

    fn sample_graph() -> GraphState {
        parse_graph_state(
            r#"{"nodes": [{"id": "cell", "label": "Cell"}], "edges": [{"from": "cell", "to": "dna", "label": "contains"}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_prompt_embeds_graph_verbatim() {
        let graph = sample_graph();
        let serialized = graph.to_json_string();
        for kind in [TaskKind::Pdf, TaskKind::Image, TaskKind::Enhancement] {
            let prompt = build_prompt(kind, &graph);
            assert!(
                prompt.contains(&serialized),
                "{} prompt is missing the serialized graph",
                kind
            );
        }
    }

    #[test]
    fn test_ingest_prompt_names_file_type() {
        let graph = sample_graph();
        assert!(build_ingest_prompt(TaskKind::Pdf, &graph).contains("newly provided PDF"));
        assert!(build_ingest_prompt(TaskKind::Image, &graph).contains("newly provided Image"));
    }

    #[test]
    fn test_ingest_prompt_structural_requirements() {
        let prompt = build_ingest_prompt(TaskKind::Pdf, &sample_graph());
        assert!(prompt.contains("nodes (concepts)"));
        assert!(prompt.contains("edges (relationships between concepts)"));
        assert!(prompt.contains("clearly labeled"));
        assert!(prompt.contains("organized logically"));
        assert!(prompt.contains("newline characters"));
        assert!(prompt.contains("raw JSON document"));
    }

    #[test]
    fn test_enhancement_prompt_format_rules() {
        let prompt = build_enhancement_prompt(&sample_graph());
        assert!(prompt.contains("gaps or missing concepts"));
        assert!(prompt.contains("exact same JSON format"));
        assert!(prompt.contains("double-quoted"));
        assert!(prompt.contains("without any extra fields"));
        assert!(!prompt.contains("newly provided"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let graph = sample_graph();
        assert_eq!(
            build_prompt(TaskKind::Image, &graph),
            build_prompt(TaskKind::Image, &graph)
        );
    }

    #[test]
    fn test_empty_graph() {
        let prompt = build_enhancement_prompt(&GraphState::default());
        assert!(prompt.contains("following information: {}."));
    }
}
