mod anthropic;
mod kimi;
mod openai;
