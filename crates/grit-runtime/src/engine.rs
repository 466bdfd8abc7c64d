use std::fmt::{Display, Write};

use grit_grammar::Grammar;

use crate::{
    lexer::Lexer,
    listener::Listener,
    parser::Parser,
    token::{Token, TokenStream},
    tree::{LexerTree, ParserTree},
};

#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Run nested passes over tokens of `retokenize` rules.
    pub retokenize: bool,
    /// Deepest nesting of retokenized blocks, the outermost pass is depth 0.
    pub max_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retokenize: true,
            max_depth: 32,
        }
    }
}

/// Result of one lexer and parser pass, with the passes run over retokenized tokens nested in it.
#[derive(Clone, Debug)]
pub struct Block {
    pub offset: usize,
    pub depth: usize,
    pub tokens: TokenStream,
    pub tree: ParserTree,
    pub nested: Vec<Block>,
}

impl Block {
    pub fn text(&self) -> &str {
        self.tokens.text()
    }

    /// This block followed by every nested block, depth-first.
    pub fn walk(&self) -> Vec<&Block> {
        let mut blocks = vec![self];
        for nested in &self.nested {
            blocks.extend(nested.walk());
        }
        blocks
    }

    pub fn display_into(
        &self,
        buf: &mut dyn Write,
        grammar: &Grammar,
        print_tree: bool,
    ) -> std::fmt::Result {
        let indent = "  ".repeat(self.depth);
        writeln!(
            buf,
            "{indent}block {}..{} depth {}",
            self.offset,
            self.offset + self.text().len(),
            self.depth
        )?;
        for token in &self.tokens {
            writeln!(buf, "{indent}  {token}")?;
        }
        if print_tree {
            for child in self.tree.children() {
                child.display_into(buf, grammar, self.depth + 1)?;
            }
        }
        for nested in &self.nested {
            nested.display_into(buf, grammar, print_tree)?;
        }
        Ok(())
    }

    pub fn display<'a>(&'a self, grammar: &'a Grammar, print_tree: bool) -> BlockDisplay<'a> {
        BlockDisplay(self, grammar, print_tree)
    }
}

#[derive(Clone, Copy)]
pub struct BlockDisplay<'a>(&'a Block, &'a Grammar, bool);
impl Display for BlockDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.display_into(f, self.1, self.2)
    }
}

/// Lexes and parses text, then does the same for the inside of every retokenized token.
pub struct SyntaxEngine<'g> {
    grammar: &'g Grammar,
    options: EngineOptions,
}

impl<'g> SyntaxEngine<'g> {
    pub fn new(grammar: &'g Grammar) -> SyntaxEngine<'g> {
        Self::with_options(grammar, EngineOptions::default())
    }

    pub fn with_options(grammar: &'g Grammar, options: EngineOptions) -> SyntaxEngine<'g> {
        SyntaxEngine { grammar, options }
    }

    pub fn grammar(&self) -> &'g Grammar {
        self.grammar
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn process(&self, text: &str) -> Block {
        self.process_with(text, &mut ())
    }

    pub fn process_with(&self, text: &str, listener: &mut dyn Listener) -> Block {
        self.process_block(text, 0, 0, listener)
    }

    fn process_block(
        &self,
        text: &str,
        offset: usize,
        depth: usize,
        listener: &mut dyn Listener,
    ) -> Block {
        listener.did_enter_block(text, offset, depth);

        let tokens = Lexer::new(self.grammar).tokenize_with(text, offset, listener);

        // nested blocks are finished before the parser moves past the tree that contains them
        let mut retokenizer = Retokenizer {
            engine: self,
            depth,
            listener,
            nested: Vec::new(),
        };
        let tree = Parser::new(self.grammar).parse_with(&tokens, &mut retokenizer);

        Block {
            offset,
            depth,
            tokens,
            tree,
            nested: retokenizer.nested,
        }
    }
}

/// Forwards parser events and runs a nested pass for every retokenized token of a finished tree.
struct Retokenizer<'a, 'g> {
    engine: &'a SyntaxEngine<'g>,
    depth: usize,
    listener: &'a mut dyn Listener,
    nested: Vec<Block>,
}

impl Retokenizer<'_, '_> {
    fn retokenize(&mut self, token: &Token) {
        let Some((inner, lead)) = strip_delimiters(token.value()) else {
            log::debug!("cannot strip delimiters of {token}, not retokenizing");
            return;
        };
        if self.depth >= self.engine.options.max_depth {
            log::warn!(
                "Retokenization depth limit of {} reached at {token}",
                self.engine.options.max_depth
            );
            return;
        }

        let block = self.engine.process_block(
            inner,
            token.start() + lead,
            self.depth + 1,
            &mut *self.listener,
        );
        self.nested.push(block);
    }
}

impl Listener for Retokenizer<'_, '_> {
    fn did_generate_token(&mut self, token: &Token, tree: &LexerTree) {
        self.listener.did_generate_token(token, tree);
    }
    fn did_not_match(&mut self, token: &Token) {
        self.listener.did_not_match(token);
    }
    fn did_generate_tree(&mut self, tree: &ParserTree) {
        self.listener.did_generate_tree(tree);
        if !self.engine.options.retokenize {
            return;
        }
        for token in tree.tokens() {
            if token.has_option("retokenize") {
                self.retokenize(token);
            }
        }
    }
    fn did_skip_token(&mut self, token: &Token) {
        self.listener.did_skip_token(token);
    }
    fn did_enter_block(&mut self, text: &str, offset: usize, depth: usize) {
        self.listener.did_enter_block(text, offset, depth);
    }
}

/// Removes one pair of enclosing delimiters, returning the inside and the length of the opening one.
///
/// Brackets must be closed by their counterpart, any other ASCII punctuation by itself. A closing
/// bracket never opens a block.
pub fn strip_delimiters(text: &str) -> Option<(&str, usize)> {
    let mut chars = text.chars();
    let first = chars.next()?;
    let last = chars.next_back()?;

    let closing = match first {
        '{' => '}',
        '(' => ')',
        '[' => ']',
        '<' => '>',
        ')' | ']' | '}' | '>' => return None,
        c if c.is_ascii_punctuation() => c,
        _ => return None,
    };
    if last != closing {
        return None;
    }

    let lead = first.len_utf8();
    Some((&text[lead..text.len() - last.len_utf8()], lead))
}
